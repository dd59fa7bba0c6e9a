use crate::config::Config;
use crate::fixture::load_fixture;
use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tether_glue::{GlueType, GraphStats};
use tether_sync::{EventQueue, MirrorGraph, SyncConfig, SyncEngine};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Args)]
pub struct SerializeArgs {
    /// Fixture file (defaults to every fixture in the fixtures directory)
    pub fixture: Option<String>,

    /// Override the configured object format version
    #[arg(long)]
    pub format_version: Option<u32>,

    /// Pretty-print the description
    #[arg(short, long)]
    pub pretty: bool,
}

pub fn serialize(args: SerializeArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let mut sync = config.sync.clone();
    if let Some(version) = args.format_version {
        sync.format_version = version;
    }

    let fixtures = match &args.fixture {
        Some(path) => vec![PathBuf::from(cwd).join(path)],
        None => find_fixtures(&config.get_fixtures_dir(cwd)),
    };
    if fixtures.is_empty() {
        println!("{} No fixtures found", "⚠️".yellow());
        return Ok(());
    }

    for path in &fixtures {
        serialize_fixture(path, &sync, args.pretty)?;
    }
    Ok(())
}

fn serialize_fixture(path: &Path, config: &SyncConfig, pretty: bool) -> Result<()> {
    debug!(fixture = %path.display(), "serializing");
    let root = load_fixture(path)?;

    let mut engine = SyncEngine::new(config.clone(), EventQueue::new());
    let envelope = engine.bind(&root)?;

    if pretty {
        println!(
            "{}({})",
            envelope.operation,
            serde_json::to_string_pretty(&envelope.payload)?
        );
    } else {
        println!("{}", envelope.render());
    }

    // Rebuild the graph the way a mirror would and make sure nothing was lost
    let mut mirror = MirrorGraph::new();
    mirror.receive(&envelope)?;
    if mirror.len() != engine.graph().len() {
        bail!(
            "{}: mirror rebuilt {} of {} nodes",
            path.display(),
            mirror.len(),
            engine.graph().len()
        );
    }

    let Some(root) = engine.root() else {
        bail!("{}: nothing was bound", path.display());
    };
    let stats = GraphStats::collect(engine.graph(), root);
    eprintln!(
        "  {} {} {} nodes ({} objects, {} collections, {} commands)",
        "✓".green(),
        path.display(),
        engine.graph().len(),
        stats.count(GlueType::Object),
        stats.count(GlueType::Collection),
        stats.count(GlueType::Command)
    );
    Ok(())
}

fn find_fixtures(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_serialize_cyclic_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().to_str().unwrap();
        fs::write(
            dir.path().join("team.json"),
            r#"{"$id": "t", "$type": "Team", "Lead": {"$type": "Person", "Team": {"$ref": "t"}}}"#,
        )
        .unwrap();

        let args = SerializeArgs {
            fixture: Some("team.json".to_string()),
            format_version: None,
            pretty: false,
        };
        assert!(serialize(args, cwd).is_ok());
    }

    #[test]
    fn test_finds_nested_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.json"), "1").unwrap();
        fs::write(dir.path().join("nested/a.json"), "2").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let found = find_fixtures(dir.path());
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_missing_fixture_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = SerializeArgs {
            fixture: Some("absent.json".to_string()),
            format_version: None,
            pretty: true,
        };
        let err = serialize(args, dir.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("cannot read fixture"));
    }
}
