use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use bugview_core::{
    parse_filter_file, write_filter_document, BugTreeModel, Config, RecordRef, Sortable,
    SortOrder, TreeNode, ViewOptions, ViewSession,
};

const MAX_FINDINGS_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "bugview")]
struct Args {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Print the grouping tree for a findings file")]
    Tree {
        findings: PathBuf,
        #[arg(long, help = "Comma-separated attribute names, 'divider' included")]
        order: Option<String>,
        #[arg(long)]
        filter: Option<PathBuf>,
    },
    #[command(about = "Count visible and hidden findings")]
    Count {
        findings: PathBuf,
        #[arg(long)]
        filter: Option<PathBuf>,
    },
    #[command(about = "List the distinct values of one attribute")]
    Values {
        findings: PathBuf,
        attribute: String,
        #[arg(long)]
        filter: Option<PathBuf>,
    },
    #[command(about = "Parse a filter document and print its normalized form")]
    CheckFilter { filter: PathBuf },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Some(Config::load(path)?),
        None => None,
    };
    init_logging(&args, config.as_ref())?;

    match args.command {
        Command::Tree { findings, order, filter } => {
            let opts = view_options(config.as_ref(), order.as_deref(), filter.as_deref())?;
            let records = load_findings(&findings)?;
            let session = build_session(records, opts);
            print_tree(session.tree(), &[], 0);
            Ok(())
        }
        Command::Count { findings, filter } => {
            let opts = view_options(config.as_ref(), None, filter.as_deref())?;
            let records = load_findings(&findings)?;
            let session = build_session(records, opts);
            let root = session.tree().root_set();
            println!(
                "{} findings, {} visible, {} hidden",
                root.unfiltered_len(),
                root.filtered_len(),
                root.count_filtered()
            );
            Ok(())
        }
        Command::Values { findings, attribute, filter } => {
            let sortable = Sortable::from_name(&attribute)
                .filter(|s| *s != Sortable::Divider)
                .ok_or_else(|| anyhow!("unknown attribute '{attribute}'"))?;
            let opts = view_options(config.as_ref(), None, filter.as_deref())?;
            let records = load_findings(&findings)?;
            let session = build_session(records, opts);
            for value in session.tree().root_set().all_values(sortable) {
                println!("{}", sortable.format(value));
            }
            Ok(())
        }
        Command::CheckFilter { filter } => {
            let document = parse_filter_file(&filter)?;
            print!("{}", write_filter_document(document.kind, &document.matchers));
            println!();
            Ok(())
        }
    }
}

fn init_logging(args: &Args, config: Option<&Config>) -> Result<()> {
    let level = match args.log_level.as_deref() {
        Some(value) => value
            .parse::<Level>()
            .map_err(|_| anyhow!("invalid log level '{value}'"))?,
        None => config
            .and_then(|c| c.log_level())
            .unwrap_or(Level::WARN),
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn view_options(
    config: Option<&Config>,
    order: Option<&str>,
    filter: Option<&Path>,
) -> Result<ViewOptions> {
    let mut opts = ViewOptions::default();
    if let Some(config) = config {
        config.apply(&mut opts);
    }
    if let Some(order) = order {
        opts.order = parse_order_flag(order)?;
    }
    if let Some(path) = filter {
        let document = parse_filter_file(path)?;
        opts.filters = document.into_filter_set();
    }
    Ok(opts)
}

fn parse_order_flag(spec: &str) -> Result<SortOrder> {
    let mut order = Vec::new();
    for name in spec.split(',').map(str::trim) {
        let sortable = Sortable::from_name(name)
            .ok_or_else(|| anyhow!("unknown attribute '{name}' in --order"))?;
        if order.contains(&sortable) {
            return Err(anyhow!("attribute '{name}' repeated in --order"));
        }
        order.push(sortable);
    }
    if !order.contains(&Sortable::Divider) {
        // A trailing divider keeps every named attribute grouping.
        order.push(Sortable::Divider);
    }
    Ok(SortOrder::new(order))
}

fn load_findings(path: &Path) -> Result<Vec<RecordRef>> {
    if let Ok(meta) = fs::metadata(path) {
        if meta.len() > MAX_FINDINGS_BYTES {
            return Err(anyhow!(
                "findings file {} exceeds {} bytes",
                path.display(),
                MAX_FINDINGS_BYTES
            ));
        }
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading findings {}", path.display()))?;
    let records: Vec<bugview_core::BugRecord> = serde_json::from_str(&data)
        .with_context(|| format!("parsing findings {}", path.display()))?;
    Ok(records.into_iter().map(Arc::new).collect())
}

fn build_session(records: Vec<RecordRef>, opts: ViewOptions) -> ViewSession {
    let mut session = ViewSession::new(records, opts.order);
    {
        let filters = Arc::clone(session.filters());
        let mut guard = match filters.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = opts.filters;
    }
    session.tree_mut().reset_data();
    session
}

fn print_tree(tree: &BugTreeModel, path: &[bugview_core::SortableValue], depth: usize) {
    let count = tree.child_count(path);
    for index in 0..count {
        let Some(node) = tree.child(path, index) else {
            continue;
        };
        match node {
            TreeNode::Branch(branch) => {
                println!("{}{branch}", "  ".repeat(depth));
                print_tree(tree, branch.atoms(), depth + 1);
            }
            TreeNode::Leaf(record) => {
                println!("{}{record}", "  ".repeat(depth));
            }
        }
    }
}
