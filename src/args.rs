use crate::model::SortColumn;
use crate::protocol::SortDirection;
use std::error::Error;

pub struct ArgParser {
    iter: std::vec::IntoIter<String>,
    command_name: String,
}

impl ArgParser {
    pub fn new(args: Vec<String>, command_name: &str) -> Self {
        Self { iter: args.into_iter(), command_name: command_name.to_string() }
    }

    /// Extract a string value for a flag
    pub fn extract_value(
        &mut self,
        flag: &str,
    ) -> Result<String, Box<dyn Error>> {
        self.iter.next().ok_or_else(|| {
            format!("Provide a value after {} for {}", flag, self.command_name)
                .into()
        })
    }

    /// Next positional argument, or a usage error.
    pub fn expect_positional(&mut self, what: &str) -> Result<String, Box<dyn Error>> {
        self.iter.next().ok_or_else(|| {
            format!("Provide {} for {}", what, self.command_name).into()
        })
    }

    /// Fail on leftover arguments.
    pub fn finish(mut self) -> Result<(), Box<dyn Error>> {
        match self.iter.next() {
            Some(extra) => Err(format!(
                "Unexpected argument for {}: {}",
                self.command_name, extra
            )
            .into()),
            None => Ok(()),
        }
    }

    /// Check if there are remaining arguments
    pub fn has_more(&self) -> bool {
        self.iter.len() > 0
    }

    /// Get next positional argument
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<String> {
        self.iter.next()
    }

    /// Collect remaining args
    pub fn collect_remaining(self) -> Vec<String> {
        self.iter.collect()
    }
}

/// Flags accepted by `list`
#[derive(Debug)]
pub struct ListFlags {
    pub sort_column: SortColumn,
    pub direction: SortDirection,
    pub table: bool,
}

impl Default for ListFlags {
    fn default() -> Self {
        Self {
            sort_column: SortColumn::Name,
            direction: SortDirection::Ascending,
            table: false,
        }
    }
}

impl ListFlags {
    pub fn parse(args: Vec<String>) -> Result<Self, Box<dyn Error>> {
        let mut flags = Self::default();
        let mut parser = ArgParser::new(args, "list");
        while let Some(arg) = parser.next() {
            match arg.as_str() {
                "--sort" => {
                    let value = parser.extract_value("--sort")?;
                    flags.sort_column = match value.as_str() {
                        "name" => SortColumn::Name,
                        "notes" => SortColumn::NoteCount,
                        other => {
                            return Err(format!(
                                "Unknown sort field: {other} (use name|notes)"
                            )
                            .into());
                        }
                    };
                }
                "--asc" => flags.direction = SortDirection::Ascending,
                "--desc" => flags.direction = SortDirection::Descending,
                "--table" => flags.table = true,
                other => {
                    return Err(format!("Unknown flag for list: {other}").into());
                }
            }
        }
        Ok(flags)
    }
}

/// Arguments of `add <name> [-p|--parent <name>] [-l|--linked <id>]`
#[derive(Debug, Default)]
pub struct AddArgs {
    pub name: String,
    pub parent: Option<String>,
    pub linked: Option<String>,
}

impl AddArgs {
    pub fn parse(args: Vec<String>) -> Result<Self, Box<dyn Error>> {
        let mut parser = ArgParser::new(args, "add");
        let mut out = AddArgs::default();
        let mut names = Vec::new();
        while let Some(arg) = parser.next() {
            match arg.as_str() {
                "-p" | "--parent" => out.parent = Some(parser.extract_value(&arg)?),
                "-l" | "--linked" => out.linked = Some(parser.extract_value(&arg)?),
                _ => names.push(arg),
            }
        }
        if names.is_empty() {
            return Err("Usage: qt add <name> [-p|--parent <name>] [-l|--linked <id>]".into());
        }
        out.name = names.join(" ");
        Ok(out)
    }
}
