use std::fs;
use std::path::{Path, PathBuf};

use arbor::tooling::cli::{CliContext, Commands};
use tempfile::TempDir;

/// Workspace with an explicit config that keeps storage inside it
fn workspace(temp: &TempDir) -> (PathBuf, PathBuf) {
    let root = temp.path().join("workspace");
    fs::create_dir_all(&root).unwrap();
    let config = temp.path().join("arbor-test.toml");
    fs::write(
        &config,
        "[catalog]\npage_size = 2\n\n[storage]\ndb_path = \"state/catalog\"\nblob_dir = \"state/uploads\"\n",
    )
    .unwrap();
    (root, config)
}

fn last_word(output: &str) -> String {
    output.split_whitespace().last().unwrap().trim_matches(|c| c == '(' || c == ')').to_string()
}

fn ls_json(cli: &CliContext, id: Option<String>) -> serde_json::Value {
    let output = cli
        .execute(&Commands::Ls {
            id,
            format: "json".to_string(),
        })
        .unwrap();
    serde_json::from_str(&output).unwrap()
}

fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn init_then_list_root_json_contract() {
    let temp = TempDir::new().unwrap();
    let (root, config) = workspace(&temp);
    let cli = CliContext::new(root.clone(), Some(config)).unwrap();

    let output = cli.execute(&Commands::Init { force: false }).unwrap();
    assert!(output.contains("Resources"));
    assert!(root.join("state/catalog").exists());

    let page = ls_json(&cli, None);
    assert_eq!(page["title"], "Resources");
    assert_eq!(page["type"], "folder");
    assert_eq!(page["is_root"], true);
    assert!(page["parent_id"].is_null());
    assert_eq!(page["chunks"].as_array().unwrap().len(), 0);

    let again = cli.execute(&Commands::Init { force: false }).unwrap();
    assert!(again.contains("already initialized"));
}

#[test]
fn mutations_round_trip_through_the_cli() {
    let temp = TempDir::new().unwrap();
    let (root, config) = workspace(&temp);
    let cli = CliContext::new(root, Some(config)).unwrap();
    cli.execute(&Commands::Init { force: false }).unwrap();
    let root_id = ls_json(&cli, None)["id"].as_str().unwrap().to_string();

    let folder = last_word(
        &cli.execute(&Commands::Mkdir {
            parent: root_id.clone(),
            title: "Lectures".to_string(),
        })
        .unwrap(),
    );

    let a = write_file(temp.path(), "intro.pdf", b"%PDF");
    let b = write_file(temp.path(), "notes.txt", b"notes");
    let upload = cli
        .execute(&Commands::Upload {
            parent: folder.clone(),
            files: vec![a, b],
        })
        .unwrap();
    assert!(upload.contains("Uploaded 2 of 2"));

    let link_output = cli
        .execute(&Commands::Link {
            parent: folder.clone(),
            title: "Rust Book".to_string(),
            href: "https://doc.rust-lang.org/book/".to_string(),
        })
        .unwrap();
    let link_id = link_output
        .split_whitespace()
        .nth(2)
        .unwrap()
        .to_string();
    let image = write_file(temp.path(), "cover.png", b"\x89PNG");
    let stored = cli
        .execute(&Commands::LinkImage {
            id: link_id.clone(),
            image,
        })
        .unwrap();
    assert!(stored.contains(&format!("{}.png", link_id)));

    let page = ls_json(&cli, Some(folder.clone()));
    let chunks = page["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].as_array().unwrap().len(), 2);
    assert_eq!(chunks[1].as_array().unwrap().len(), 1);
    assert_eq!(page["parent_id"], root_id.as_str());

    cli.execute(&Commands::Rename {
        id: folder.clone(),
        title: "Lectures 2024".to_string(),
    })
    .unwrap();
    let shown = cli
        .execute(&Commands::Show {
            id: folder.clone(),
            format: "json".to_string(),
        })
        .unwrap();
    let node: serde_json::Value = serde_json::from_str(&shown).unwrap();
    assert_eq!(node["title"], "Lectures 2024");

    let deleted = cli.execute(&Commands::Rm { id: folder.clone() }).unwrap();
    assert!(deleted.starts_with("Deleted folder"));

    let check = cli
        .execute(&Commands::Check {
            format: "json".to_string(),
        })
        .unwrap();
    let report: serde_json::Value = serde_json::from_str(&check).unwrap();
    assert_eq!(report["nodes"], 1);
    assert_eq!(report["violations"].as_array().unwrap().len(), 0);

    assert!(cli.execute(&Commands::Recover).unwrap().contains("No interrupted"));
}

#[test]
fn errors_are_specific() {
    let temp = TempDir::new().unwrap();
    let (root, config) = workspace(&temp);
    let cli = CliContext::new(root, Some(config)).unwrap();
    cli.execute(&Commands::Init { force: false }).unwrap();
    let root_id = ls_json(&cli, None)["id"].as_str().unwrap().to_string();

    let malformed = cli.execute(&Commands::Rm {
        id: "nope".to_string(),
    });
    assert!(matches!(
        malformed,
        Err(arbor::error::ApiError::InvalidInput(_))
    ));

    let missing = cli.execute(&Commands::Rm {
        id: arbor::types::NodeId::new().to_string(),
    });
    assert!(matches!(missing, Err(arbor::error::ApiError::NotFound(_))));

    let root_delete = cli.execute(&Commands::Rm { id: root_id });
    assert!(matches!(
        root_delete,
        Err(arbor::error::ApiError::InvalidInput(_))
    ));
}

#[test]
fn config_command_prints_effective_toml() {
    let temp = TempDir::new().unwrap();
    let (root, config) = workspace(&temp);
    let cli = CliContext::new(root, Some(config)).unwrap();

    let output = cli.execute(&Commands::Config).unwrap();
    let parsed: toml::Value = toml::from_str(&output).unwrap();
    assert_eq!(parsed["catalog"]["page_size"].as_integer(), Some(2));
    assert_eq!(parsed["storage"]["db_path"].as_str(), Some("state/catalog"));
}
