pub mod args;
pub mod config;
pub mod error;
pub mod events;
pub mod formatting;
pub mod model;
pub mod mutator;
pub mod pending;
pub mod protocol;
pub mod restrictions;
pub mod session;
pub mod storage;
pub mod store;
pub mod tag;
pub mod tokens;
pub mod view;

pub mod shared {
    pub mod table;
}

pub use config::Config;
pub use error::{StorageError, TagError};
pub use events::ModelEvent;
pub use model::{ModelConfig, SortColumn, TagModel};
pub use protocol::{Request, Response, SortDirection};
pub use session::Session;
pub use storage::FileTagStorage;
pub use tag::TagRecord;
pub use tokens::PositionToken;
pub use view::{CellValue, Column, ItemFlags};

use args::{AddArgs, ArgParser, ListFlags};
use chrono::Utc;
use formatting::{FormatContext, TimeFormatter};
use protocol::{NotebookRecord, NotebookRestrictions};
use shared::table::{Align, render_table, truncate_with_ellipsis};
use std::env;
use std::error::Error;
use tracing::debug;

pub fn entry() -> Result<(), Box<dyn Error>> {
    config::init_tracing();
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        print_help();
        return Ok(());
    }

    let cmd = args.remove(0);
    let config = Config::from_env()?;
    debug!(command = %cmd, dir = %config.dir.display(), "running command");

    match cmd.as_str() {
        "list" => list_tags(args, &config)?,
        "add" => add_tag(args, &config)?,
        "rename" => rename_tag(args, &config)?,
        "delete" => delete_tag(args, &config)?,
        "promote" => reshape(args, &config, Reshape::Promote)?,
        "demote" => reshape(args, &config, Reshape::Demote)?,
        "detach" => reshape(args, &config, Reshape::Detach)?,
        "move" => move_tag(args, &config)?,
        "favorite" => favorite(args, &config, true)?,
        "unfavorite" => favorite(args, &config, false)?,
        "notebook" => notebook(args, &config)?,
        "status" => status(&config)?,
        "path" => println!("{}", config.dir.display()),
        "help" => print_help(),
        other => {
            return Err(format!("Unknown command: {other}. Run `qt help` for usage.").into());
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        "\
Quick Tags CLI
Usage:
  qt list [--sort name|notes] [--asc|--desc] [--table]
                                  Show the tag tree (default: by name, ascending)
  qt add <name> [-p|--parent <name>] [-l|--linked <id>]
                                  Create a tag, optionally under a parent or in a linked notebook
  qt rename <name> <new name>     Rename a tag
  qt delete <name>                Delete a tag and its children (refused for synchronized tags)
  qt promote <name>               Move a tag up one level, right after its parent
  qt demote <name>                Make a tag a child of the sibling above it
  qt move <name> <parent>         Re-parent a tag
  qt detach <name>                Move a tag to the top level
  qt favorite <name>              Mark a tag as favorite
  qt unfavorite <name>            Clear the favorite mark
  qt notebook <linked id> [--no-create-tags] [--no-update-tags]
                                  Record tag restrictions for a linked notebook
  qt status                       Show catalog statistics
  qt path                         Show the tags directory
  qt help                         Show this message

Environment:
  QUICK_TAGS_DIR                  Override tags directory (default: ~/.quick_tags)
  QUICK_TAGS_PAGE_SIZE            Tags fetched per listing page (default: 100)
  QUICK_TAGS_LOG                  Log filter, e.g. debug (default: warn)
  NO_COLOR                        Disable colored output
"
    );
}

/// Width of the attached terminal, if any.
fn terminal_columns() -> Option<usize> {
    terminal_size::terminal_size().map(|(terminal_size::Width(w), _)| w as usize)
}

fn list_tags(args: Vec<String>, config: &Config) -> Result<(), Box<dyn Error>> {
    let flags = ListFlags::parse(args)?;
    let mut session = Session::open(config)?;
    session.model_mut().sort(flags.sort_column, flags.direction);
    session.finish()?;

    let model = session.model_mut();
    if model.row_count(None) == 0 {
        println!("No tags yet. Try `qt add <name>`.");
        return Ok(());
    }
    let ctx = FormatContext::new(config.use_color);
    let mut nodes = Vec::new();
    walk(model, None, 0, &mut nodes);
    if flags.table {
        print_table(model, &nodes, &ctx);
    } else {
        print_tree(model, &nodes, &ctx, terminal_columns());
    }
    Ok(())
}

/// Depth-first visit in display order.
fn walk(
    model: &mut TagModel,
    parent: Option<PositionToken>,
    depth: usize,
    out: &mut Vec<(PositionToken, usize)>,
) {
    for row in 0..model.row_count(parent) {
        let Some(token) = model.index(row, parent) else {
            continue;
        };
        out.push((token, depth));
        walk(model, Some(token), depth + 1, out);
    }
}

fn print_tree(
    model: &TagModel,
    nodes: &[(PositionToken, usize)],
    ctx: &FormatContext,
    width: Option<usize>,
) {
    for &(token, depth) in nodes {
        let indent = "  ".repeat(depth);
        let room = width.map(|w| w.saturating_sub(indent.len()).max(8));
        let Some(local_id) = model.local_id_for(token) else {
            if let Some(CellValue::Text(linked)) = model.data(token, Column::Name) {
                println!("{indent}{}", ctx.format_group(&linked));
            }
            continue;
        };
        let Some(tag) = model.tag(local_id) else {
            continue;
        };
        let name = match room {
            Some(room) => truncate_with_ellipsis(&tag.name, room),
            None => tag.name.clone(),
        };
        let mut line = format!("{indent}{}", ctx.format_tag(&name));
        if let Some(count) = model.note_count(local_id).filter(|n| *n > 0) {
            line.push_str(&format!(" {}", ctx.format_muted(&format!("({count})"))));
        }
        let markers = ctx.format_markers(tag.is_favorited, tag.is_dirty, tag.is_synchronized());
        if !markers.is_empty() {
            line.push_str(&format!("  {markers}"));
        }
        println!("{line}");
    }
}

fn print_table(model: &TagModel, nodes: &[(PositionToken, usize)], ctx: &FormatContext) {
    let headers: Vec<String> = Column::ALL.iter().map(|c| ctx.format_header(c.header())).collect();
    let aligns: Vec<Align> = Column::ALL
        .iter()
        .map(|c| if *c == Column::NoteCount { Align::Right } else { Align::Left })
        .collect();
    let rows: Vec<Vec<String>> = nodes
        .iter()
        .map(|&(token, depth)| {
            Column::ALL
                .iter()
                .map(|column| match model.data(token, *column) {
                    Some(CellValue::Text(text)) if *column == Column::Name => {
                        format!("{}{}", "  ".repeat(depth), text)
                    }
                    Some(CellValue::Text(text)) => text,
                    Some(CellValue::Flag(true)) => "yes".to_string(),
                    Some(CellValue::Flag(false)) | None => String::new(),
                    Some(CellValue::Count(count)) => count.to_string(),
                })
                .collect()
        })
        .collect();
    println!("{}", render_table(&headers, &aligns, &rows));
}

fn single_name(args: Vec<String>, command: &str) -> Result<String, Box<dyn Error>> {
    let mut parser = ArgParser::new(args, command);
    let name = parser.expect_positional("a tag name")?;
    parser.finish()?;
    Ok(name)
}

/// Where a tag sits now, for confirmation messages.
fn placement(model: &TagModel, local_id: &str) -> String {
    let parent = model
        .tag(local_id)
        .and_then(|t| t.parent_local_id.as_deref())
        .and_then(|id| model.tag(id));
    match parent {
        Some(parent) => format!("under \"{}\"", parent.name),
        None => "to the top level".to_string(),
    }
}

fn add_tag(args: Vec<String>, config: &Config) -> Result<(), Box<dyn Error>> {
    let args = AddArgs::parse(args)?;
    let mut session = Session::open(config)?;
    let parent = match args.parent.as_deref() {
        Some(name) => Some(session.find(name)?.0),
        None => None,
    };
    let linked = args.linked.clone().or_else(|| {
        parent
            .as_deref()
            .and_then(|id| session.model().tag(id))
            .and_then(|t| t.linked_scope().map(str::to_string))
    });
    let token = session
        .model_mut()
        .create_tag(&args.name, parent.as_deref(), linked.as_deref())?;
    session.finish()?;
    let model = session.model();
    let name = model
        .local_id_for(token)
        .and_then(|id| model.tag(id))
        .map(|t| t.name.clone())
        .unwrap_or(args.name);
    println!("Added tag {name}");
    Ok(())
}

fn rename_tag(args: Vec<String>, config: &Config) -> Result<(), Box<dyn Error>> {
    let mut parser = ArgParser::new(args, "rename");
    let old = parser.expect_positional("the current tag name")?;
    let new = parser.collect_remaining().join(" ");
    if new.is_empty() {
        return Err("Usage: qt rename <name> <new name>".into());
    }
    let mut session = Session::open(config)?;
    let (local_id, _) = session.find(&old)?;
    session.model_mut().rename_tag(&local_id, &new)?;
    session.finish()?;
    let renamed = session.model().tag(&local_id).map(|t| t.name.clone()).unwrap_or(new);
    println!("Renamed {old} to {renamed}");
    Ok(())
}

fn delete_tag(args: Vec<String>, config: &Config) -> Result<(), Box<dyn Error>> {
    let name = single_name(args, "delete")?;
    let mut session = Session::open(config)?;
    let (local_id, _) = session.find(&name)?;
    let children = session.model().store().descendants(&local_id).len();
    session.model_mut().expunge_tag(&local_id)?;
    session.finish()?;
    match children {
        0 => println!("Deleted tag {name}"),
        1 => println!("Deleted tag {name} and 1 child tag"),
        n => println!("Deleted tag {name} and {n} child tags"),
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Reshape {
    Promote,
    Demote,
    Detach,
}

fn reshape(args: Vec<String>, config: &Config, kind: Reshape) -> Result<(), Box<dyn Error>> {
    let command = match kind {
        Reshape::Promote => "promote",
        Reshape::Demote => "demote",
        Reshape::Detach => "detach",
    };
    let name = single_name(args, command)?;
    let mut session = Session::open(config)?;
    let (local_id, token) = session.find(&name)?;
    let model = session.model_mut();
    match kind {
        Reshape::Promote => model.promote(token)?,
        Reshape::Demote => model.demote(token)?,
        Reshape::Detach => model.remove_from_parent(token)?,
    };
    session.finish()?;
    let verb = match kind {
        Reshape::Promote => "Promoted",
        Reshape::Demote => "Demoted",
        Reshape::Detach => "Moved",
    };
    println!("{verb} {name} {}", placement(session.model(), &local_id));
    Ok(())
}

fn move_tag(args: Vec<String>, config: &Config) -> Result<(), Box<dyn Error>> {
    let mut parser = ArgParser::new(args, "move");
    let name = parser.expect_positional("the tag to move")?;
    let parent = parser.expect_positional("the new parent")?;
    parser.finish()?;
    let mut session = Session::open(config)?;
    let (local_id, token) = session.find(&name)?;
    session.model_mut().move_to_parent(token, &parent)?;
    session.finish()?;
    println!("Moved {name} {}", placement(session.model(), &local_id));
    Ok(())
}

fn favorite(args: Vec<String>, config: &Config, on: bool) -> Result<(), Box<dyn Error>> {
    let name = single_name(args, if on { "favorite" } else { "unfavorite" })?;
    let mut session = Session::open(config)?;
    let (local_id, _) = session.find(&name)?;
    session.model_mut().set_favorited(&local_id, on)?;
    session.finish()?;
    if on {
        println!("Favorited {name}");
    } else {
        println!("Unfavorited {name}");
    }
    Ok(())
}

fn notebook(args: Vec<String>, config: &Config) -> Result<(), Box<dyn Error>> {
    let mut parser = ArgParser::new(args, "notebook");
    let linked = parser.expect_positional("a linked notebook id")?;
    let mut restrictions = NotebookRestrictions::default();
    while let Some(flag) = parser.next() {
        match flag.as_str() {
            "--no-create-tags" => restrictions.no_create_tags = true,
            "--no-update-tags" => restrictions.no_update_tags = true,
            other => return Err(format!("Unknown flag for notebook: {other}").into()),
        }
    }
    let storage = FileTagStorage::open(&config.dir)?;
    let local_id = storage
        .notebooks()?
        .into_iter()
        .find(|n| n.linked_notebook_id.as_deref() == Some(linked.as_str()))
        .map(|n| n.local_id)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    storage.save_notebook(NotebookRecord {
        local_id,
        linked_notebook_id: Some(linked.clone()),
        restrictions,
    })?;
    let allowed = |restricted: bool| if restricted { "restricted" } else { "allowed" };
    println!(
        "Notebook {linked}: creating tags {}, updating tags {}",
        allowed(restrictions.no_create_tags),
        allowed(restrictions.no_update_tags)
    );
    Ok(())
}

fn status(config: &Config) -> Result<(), Box<dyn Error>> {
    let mut session = Session::open(config)?;
    session.finish()?;
    let ctx = FormatContext::new(config.use_color);
    let model = session.model();
    let store = model.store();
    let top_level = store.iter().filter(|t| t.parent_local_id.is_none()).count();
    let favorites = store.iter().filter(|t| t.is_favorited).count();
    let synchronized = store.iter().filter(|t| t.is_synchronized()).count();
    let notebooks = session.storage().notebooks()?.len();
    let saved = match session.storage().saved_at() {
        Some(at) => ctx.format_timestamp(&TimeFormatter::new(Utc::now()).format_relative(at)),
        None => ctx.format_muted("never"),
    };
    println!("{}", ctx.format_header("Tags"));
    println!("  total:        {}", store.len());
    println!("  top level:    {top_level}");
    println!("  favorites:    {favorites}");
    println!("  synchronized: {synchronized}");
    println!("  linked:       {}", store.linked_scopes().len());
    println!("  notebooks:    {notebooks}");
    println!("  saved:        {saved}");
    Ok(())
}
