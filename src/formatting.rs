use chrono::{DateTime, Utc};
use yansi::Paint;

/// Color palette for consistent theming
pub struct ColorPalette {
    pub muted: (u8, u8, u8),   // tokens, markers
    pub header: (u8, u8, u8),  // headers, linked groups
    pub time: (u8, u8, u8),    // timestamps
    pub warning: (u8, u8, u8), // dirty markers
}

impl ColorPalette {
    pub const CATPPUCCIN: Self = Self {
        muted: (108, 112, 134),  // Gray
        header: (148, 226, 213), // Teal
        time: (137, 180, 250),   // Blue
        warning: (243, 139, 168), // Pink
    };
}

/// Formatting context passed through the tree and table printers
pub struct FormatContext {
    pub use_color: bool,
    pub palette: ColorPalette,
}

impl FormatContext {
    pub fn new(use_color: bool) -> Self {
        Self { use_color, palette: ColorPalette::CATPPUCCIN }
    }

    fn paint(&self, text: &str, (r, g, b): (u8, u8, u8), bold: bool) -> String {
        if !self.use_color {
            return text.to_string();
        }
        let painted = Paint::rgb(text, r, g, b);
        if bold { painted.bold().to_string() } else { painted.to_string() }
    }

    pub fn format_muted(&self, text: &str) -> String {
        self.paint(text, self.palette.muted, false)
    }

    pub fn format_header(&self, text: &str) -> String {
        self.paint(text, self.palette.header, true)
    }

    pub fn format_timestamp(&self, text: &str) -> String {
        self.paint(text, self.palette.time, false)
    }

    /// Tag names get a stable per-name color.
    pub fn format_tag(&self, name: &str) -> String {
        self.paint(name, crate::tag::color_for_tag(name), true)
    }

    pub fn format_group(&self, linked_notebook_id: &str) -> String {
        self.format_header(&format!("[{linked_notebook_id}]"))
    }

    /// Short status markers shown after a tag name.
    pub fn format_markers(&self, favorited: bool, dirty: bool, synchronized: bool) -> String {
        let mut parts = Vec::new();
        if favorited {
            parts.push(self.paint("*", self.palette.header, true));
        }
        if dirty {
            parts.push(self.paint("dirty", self.palette.warning, false));
        }
        if synchronized {
            parts.push(self.format_muted("synced"));
        }
        parts.join(" ")
    }
}

/// Relative "N ago" formatting against a fixed now.
pub struct TimeFormatter {
    now: DateTime<Utc>,
}

impl TimeFormatter {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn format_relative(&self, dt: DateTime<Utc>) -> String {
        let dur = self.now.signed_duration_since(dt);
        let total_minutes = dur.num_minutes().max(0);
        let total_hours = dur.num_hours().max(0);
        let total_days = dur.num_days().max(0);

        if total_hours == 0 {
            if total_minutes == 0 {
                return "just now".to_string();
            }
            return format!("{}m ago", total_minutes);
        }
        if total_days < 30 {
            if total_days == 0 {
                return format!("{}h ago", total_hours);
            }
            let hours = (total_hours - total_days * 24).max(0);
            if hours > 0 {
                format!("{}d {}h ago", total_days, hours)
            } else {
                format!("{}d ago", total_days)
            }
        } else if total_days < 365 {
            let months = total_days / 30;
            let days = total_days % 30;
            if days > 0 {
                format!("{}mo {}d ago", months, days)
            } else {
                format!("{}mo ago", months)
            }
        } else {
            let years = total_days / 365;
            let months = (total_days % 365) / 30;
            if months > 0 {
                format!("{}y {}mo ago", years, months)
            } else {
                format!("{}y ago", years)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_context_no_color() {
        let ctx = FormatContext::new(false);
        assert_eq!(ctx.format_muted("#3"), "#3");
        assert_eq!(ctx.format_header("Tags"), "Tags");
        assert_eq!(ctx.format_tag("work"), "work");
        assert_eq!(ctx.format_group("nb"), "[nb]");
    }

    #[test]
    fn test_format_context_with_color() {
        let ctx = FormatContext::new(true);
        let name = ctx.format_tag("work");
        assert!(name.contains("work"));
        assert!(name.len() > "work".len());
    }

    #[test]
    fn test_markers() {
        let ctx = FormatContext::new(false);
        assert_eq!(ctx.format_markers(true, true, false), "* dirty");
        assert_eq!(ctx.format_markers(false, false, true), "synced");
        assert_eq!(ctx.format_markers(false, false, false), "");
    }

    #[test]
    fn test_time_formatter_relative() {
        let now = Utc::now();
        let formatter = TimeFormatter::new(now);
        assert_eq!(formatter.format_relative(now), "just now");
        assert_eq!(formatter.format_relative(now - Duration::minutes(5)), "5m ago");
        assert_eq!(formatter.format_relative(now - Duration::hours(26)), "1d 2h ago");
        assert_eq!(formatter.format_relative(now - Duration::days(400)), "1y 1mo ago");
    }
}
