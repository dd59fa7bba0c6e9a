use crate::config::{Config, DEFAULT_CONFIG_NAME};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

const EXAMPLE_FIXTURE: &str = r#"{
  "$id": "team",
  "$type": "Team",
  "Name": "Platform",
  "Lead": {
    "$id": "ann",
    "$type": "Person",
    "Name": "Ann",
    "Team": { "$ref": "team" }
  },
  "Members": {
    "$list": "Person",
    "$items": [
      { "$ref": "ann" },
      { "$type": "Person", "Name": "Bob", "Team": { "$ref": "team" } }
    ]
  },
  "Founded": { "$date": "2021-03-01T09:00:00Z" },
  "Archive": { "$command": false }
}
"#;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Fixtures directory
    #[arg(short, long, default_value = "fixtures")]
    pub fixtures_dir: String,

    /// Object format version written into every expanded object
    #[arg(long, default_value_t = tether_glue::CURRENT_FORMAT_VERSION)]
    pub format_version: u32,

    /// Force overwrite existing config
    #[arg(short, long)]
    pub force: bool,
}

pub fn init(args: InitArgs, cwd: &str) -> Result<()> {
    let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists",
            "⚠️".yellow(),
            DEFAULT_CONFIG_NAME.bright_white()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    println!("{}", "📝 Initializing Tether project...".bright_blue().bold());

    let fixtures_dir = PathBuf::from(cwd).join(&args.fixtures_dir);
    if !fixtures_dir.exists() {
        fs::create_dir_all(&fixtures_dir)?;
        println!("  {} Created {}/", "✓".green(), args.fixtures_dir);
    }

    let example_file = fixtures_dir.join("example.json");
    if !example_file.exists() {
        fs::write(&example_file, EXAMPLE_FIXTURE)?;
        println!("  {} Created example.json", "✓".green());
    }

    let mut config = Config {
        fixtures_dir: args.fixtures_dir.clone(),
        ..Config::default()
    };
    config.sync.format_version = args.format_version;

    let config_json = serde_json::to_string_pretty(&config)?;
    fs::write(&config_path, config_json)?;
    println!("  {} Created {}", "✓".green(), DEFAULT_CONFIG_NAME);

    println!();
    println!("{}", "✨ Project initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Describe a native graph in {}/", args.fixtures_dir);
    println!("  2. Run {} to see what the mirror receives", "tether serialize".bright_cyan());

    Ok(())
}
