use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use sitesmith_contracts::catalog::CatalogCategory;
use sitesmith_contracts::images::unresolved_slots;
use sitesmith_contracts::request::GenerationRequest;
use sitesmith_engine::{
    Collaborators, EngineConfig, FilePageStore, OrderChangeOutcome, PageSession,
};

#[derive(Debug, Parser)]
#[command(name = "sitesmith", version, about = "Generate and edit pages from a brief")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Reorder(ReorderArgs),
    Edit(EditArgs),
    RegenerateImage(RegenerateImageArgs),
    List(ListArgs),
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// Page store directory.
    #[arg(long)]
    store: PathBuf,
    /// Event log; defaults to `<store>/events.jsonl`.
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "dryrun")]
    image_provider: String,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long)]
    page: String,
    #[arg(long)]
    brief: String,
    /// Comma separated section keys.
    #[arg(long)]
    sections: String,
    #[arg(long, default_value = "friendly")]
    tone: String,
    #[arg(long)]
    industry: Option<String>,
    #[arg(long)]
    palette: Vec<String>,
    /// `id:name`, repeatable.
    #[arg(long = "category")]
    categories: Vec<String>,
    #[arg(long)]
    title: Option<String>,
}

#[derive(Debug, Parser)]
struct ReorderArgs {
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long)]
    page: String,
    #[arg(long)]
    sections: String,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long)]
    page: String,
    #[arg(long)]
    section: String,
    /// Replacement record as inline JSON.
    #[arg(long, conflicts_with = "data_file")]
    data: Option<String>,
    #[arg(long)]
    data_file: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct RegenerateImageArgs {
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long)]
    page: String,
    #[arg(long)]
    slot: String,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "16:9")]
    aspect_ratio: String,
}

#[derive(Debug, Parser)]
struct ListArgs {
    #[command(flatten)]
    store: StoreArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("sitesmith error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let summary = match cli.command {
        Command::Generate(args) => run_generate(args)?,
        Command::Reorder(args) => run_reorder(args)?,
        Command::Edit(args) => run_edit(args)?,
        Command::RegenerateImage(args) => run_regenerate_image(args)?,
        Command::List(args) => run_list(args)?,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(0)
}

struct Workspace {
    session: PageSession,
    store: FilePageStore,
}

impl Workspace {
    fn open(args: &StoreArgs) -> Result<Self> {
        fs::create_dir_all(&args.store)
            .with_context(|| format!("failed creating {}", args.store.display()))?;
        let events_path = args
            .events
            .clone()
            .unwrap_or_else(|| args.store.join("events.jsonl"));
        let store = FilePageStore::new(&args.store);
        let session = PageSession::new(
            events_path,
            EngineConfig::from_env(),
            Collaborators::from_env(&args.image_provider, Arc::new(store.clone()))?,
        )?;
        Ok(Self { session, store })
    }

    fn open_page(args: &StoreArgs, page_id: &str) -> Result<Self> {
        let workspace = Self::open(args)?;
        workspace
            .session
            .open_page(&workspace.store, page_id, &print_stage)?;
        Ok(workspace)
    }

    fn save(&self, page_id: Option<&str>, config: &Map<String, Value>) -> Result<Value> {
        let saved = self.session.save(&self.store, page_id, config)?;
        let snapshot = self.session.snapshot();
        Ok(json!({
            "page": saved.id,
            "saved_at": saved.saved_at,
            "sections": snapshot.document.section_order(),
            "images": snapshot.images.len(),
            "placeholders": snapshot.images.placeholder_slots(),
            "unresolved": unresolved_slots(&snapshot.document, &snapshot.images),
        }))
    }
}

fn print_stage(stage: Option<&str>) {
    if let Some(stage) = stage {
        eprintln!("... {stage}");
    }
}

fn run_generate(args: GenerateArgs) -> Result<Value> {
    let workspace = Workspace::open(&args.store)?;
    let categories = args
        .categories
        .iter()
        .map(|raw| parse_category(raw))
        .collect::<Result<Vec<CatalogCategory>>>()?;
    let mut request = GenerationRequest::new(args.brief, parse_sections(&args.sections)?)
        .with_tone(args.tone)
        .with_palette(args.palette)
        .with_categories(categories);
    if let Some(industry) = args.industry {
        request = request.with_industry(industry);
    }

    workspace.session.generate_page(request, &print_stage)?;
    let mut config = Map::new();
    if let Some(title) = args.title {
        config.insert("title".to_string(), Value::String(title));
    }
    workspace.save(Some(&args.page), &config)
}

fn run_reorder(args: ReorderArgs) -> Result<Value> {
    let workspace = Workspace::open_page(&args.store, &args.page)?;
    let outcome = workspace
        .session
        .apply_section_order_change(parse_sections(&args.sections)?, &print_stage)?;
    let added = match outcome {
        OrderChangeOutcome::Applied { added, .. } => added,
        OrderChangeOutcome::Deferred => Vec::new(),
    };
    let mut summary = workspace.save(None, &Map::new())?;
    summary["added"] = json!(added);
    Ok(summary)
}

fn run_edit(args: EditArgs) -> Result<Value> {
    let raw = match (&args.data, &args.data_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?,
        (None, None) => bail!("edit requires --data or --data-file"),
    };
    let data: Value = serde_json::from_str(&raw).context("section data is not valid JSON")?;
    if !data.is_object() {
        bail!("section data must be a JSON object");
    }

    let workspace = Workspace::open_page(&args.store, &args.page)?;
    let outcome = workspace
        .session
        .apply_section_edit(&args.section, data, &print_stage)?;
    let mut summary = workspace.save(None, &Map::new())?;
    summary["regenerated"] = json!(outcome.regenerated);
    summary["literals"] = json!(outcome.literals);
    Ok(summary)
}

fn run_regenerate_image(args: RegenerateImageArgs) -> Result<Value> {
    let workspace = Workspace::open_page(&args.store, &args.page)?;
    let image = workspace.session.regenerate_single_image(
        &args.slot,
        &args.prompt,
        &args.aspect_ratio,
        &print_stage,
    )?;
    let mut summary = workspace.save(None, &Map::new())?;
    summary["slot"] = Value::String(args.slot);
    summary["placeholder"] = Value::Bool(image.is_placeholder());
    Ok(summary)
}

fn run_list(args: ListArgs) -> Result<Value> {
    let workspace = Workspace::open(&args.store)?;
    let pages = workspace.session.load_page_list(&workspace.store)?;
    Ok(json!({ "pages": pages }))
}

fn parse_sections(raw: &str) -> Result<Vec<String>> {
    let sections = raw
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect::<Vec<String>>();
    if sections.is_empty() {
        bail!("--sections must name at least one section");
    }
    Ok(sections)
}

fn parse_category(raw: &str) -> Result<CatalogCategory> {
    let Some((id, name)) = raw.split_once(':') else {
        bail!("category '{raw}' must look like id:name");
    };
    let (id, name) = (id.trim(), name.trim());
    if id.is_empty() || name.is_empty() {
        bail!("category '{raw}' must look like id:name");
    }
    Ok(CatalogCategory {
        id: id.to_string(),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_args(temp: &tempfile::TempDir) -> StoreArgs {
        StoreArgs {
            store: temp.path().join("pages"),
            events: None,
            image_provider: "dryrun".to_string(),
        }
    }

    #[test]
    fn parses_section_lists_and_categories() -> Result<()> {
        assert_eq!(
            parse_sections(" hero, testimonials,,footer ")?,
            vec!["hero", "testimonials", "footer"]
        );
        assert!(parse_sections(" , ").is_err());
        assert_eq!(
            parse_category("c1: Bread")?,
            CatalogCategory {
                id: "c1".to_string(),
                name: "Bread".to_string(),
            }
        );
        assert!(parse_category("Bread").is_err());
        Ok(())
    }

    #[test]
    fn generate_then_reorder_round_trips_through_the_store() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let generated = run_generate(GenerateArgs {
            store: store_args(&temp),
            page: "home".to_string(),
            brief: "A neighbourhood bakery".to_string(),
            sections: "hero,testimonials,footer".to_string(),
            tone: "friendly".to_string(),
            industry: None,
            palette: Vec::new(),
            categories: Vec::new(),
            title: Some("Bakery".to_string()),
        })?;
        assert_eq!(generated["page"], json!("home"));
        assert_eq!(generated["unresolved"], json!([]));

        let reordered = run_reorder(ReorderArgs {
            store: store_args(&temp),
            page: "home".to_string(),
            sections: "footer,hero,pricing".to_string(),
        })?;
        assert_eq!(reordered["sections"], json!(["footer", "hero", "pricing"]));
        assert_eq!(reordered["added"], json!(["pricing"]));

        let listed = run_list(ListArgs {
            store: store_args(&temp),
        })?;
        assert_eq!(listed["pages"][0]["id"], json!("home"));
        assert_eq!(listed["pages"][0]["title"], json!("Bakery"));
        Ok(())
    }

    #[test]
    fn generated_products_stay_resolvable_after_the_run() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let args = store_args(&temp);
        run_generate(GenerateArgs {
            store: store_args(&temp),
            page: "shop".to_string(),
            brief: "A neighbourhood bakery".to_string(),
            sections: "hero,products,footer".to_string(),
            tone: "friendly".to_string(),
            industry: Some("bakery".to_string()),
            palette: Vec::new(),
            categories: vec!["c1:Bread".to_string()],
            title: None,
        })?;

        let saved: Value = serde_json::from_str(&fs::read_to_string(
            args.store.join("pages").join("shop.json"),
        )?)?;
        let referenced = saved["snapshot"]["document"]["sections"]["products"]["itemIds"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(referenced.len(), 3);

        let store = FilePageStore::new(&args.store);
        let owner = EngineConfig::from_env().owner_id;
        let stored: Vec<Value> = store
            .catalog_items(&owner)?
            .into_iter()
            .map(|item| json!(item.id))
            .collect();
        assert_eq!(stored, referenced);
        Ok(())
    }

    #[test]
    fn edit_rejects_non_object_data() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let err = run_edit(EditArgs {
            store: store_args(&temp),
            page: "home".to_string(),
            section: "hero".to_string(),
            data: Some("[1, 2]".to_string()),
            data_file: None,
        })
        .expect_err("array data is rejected");
        assert!(err.to_string().contains("JSON object"));
        Ok(())
    }
}
