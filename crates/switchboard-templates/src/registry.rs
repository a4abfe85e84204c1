//! Template registry — seeding, CRUD, and name resolution over the store.
//!
//! Built-in templates ship as `*.md` files with optional YAML front matter.
//! On startup they are upserted by filename-without-extension, so repeated
//! startups leave the set unchanged and user edits to the same names are
//! overwritten back to the shipped content (user-owned names survive).

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use switchboard_store::{CommandTemplate, Result as StoreResult, Store};

/// Front matter recognized on a built-in template file.
#[derive(Debug, Default, Deserialize)]
struct TemplateFrontMatter {
    #[serde(default)]
    description: Option<String>,
}

/// Name resolution and CRUD for prompt templates.
#[derive(Clone)]
pub struct TemplateRegistry {
    store: Arc<Store>,
}

impl TemplateRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// The resolution primitive the orchestrator dispatches through.
    pub fn get(&self, name: &str) -> StoreResult<Option<CommandTemplate>> {
        self.store.get_template(name)
    }

    pub fn list(&self) -> StoreResult<Vec<CommandTemplate>> {
        self.store.list_templates()
    }

    pub fn upsert(&self, name: &str, description: Option<&str>, content: &str) -> StoreResult<()> {
        self.store.upsert_template(name, description, content)
    }

    pub fn delete(&self, name: &str) -> StoreResult<bool> {
        self.store.delete_template(name)
    }

    /// Upsert every `*.md` under `dir`, keyed by file stem. A missing
    /// directory is not an error — deployments may ship no built-ins.
    pub fn seed_builtin(&self, dir: &Path) -> StoreResult<usize> {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no built-in template directory, skipping seed");
            return Ok(0);
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "built-in template directory unreadable");
                return Ok(0);
            }
        };

        let mut seeded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = match std::fs::read_to_string(&path) {
                Ok(s) => s,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable template");
                    continue;
                }
            };

            let (front, body) = split_front_matter(&raw);
            self.upsert(name, front.description.as_deref(), body)?;
            seeded += 1;
        }

        info!(count = seeded, dir = %dir.display(), "built-in templates seeded");
        Ok(seeded)
    }
}

/// Split optional YAML front matter (between `---` fences) from the body.
///
/// Content without a fence, or with unparsable YAML, is treated as all body.
fn split_front_matter(content: &str) -> (TemplateFrontMatter, &str) {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return (TemplateFrontMatter::default(), content);
    }

    let after_first = &trimmed[3..];
    let Some(closing_idx) = after_first.find("\n---") else {
        return (TemplateFrontMatter::default(), content);
    };
    let yaml_block = &after_first[..closing_idx];
    let body = after_first[closing_idx + 4..].trim_start_matches('\n');

    match serde_yaml::from_str::<TemplateFrontMatter>(yaml_block) {
        Ok(front) => (front, body),
        Err(_) => (TemplateFrontMatter::default(), content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TemplateRegistry {
        TemplateRegistry::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn front_matter_description_extracted() {
        let (front, body) = split_front_matter("---\ndescription: plan a task\n---\nPlan: $1\n");
        assert_eq!(front.description.as_deref(), Some("plan a task"));
        assert_eq!(body, "Plan: $1\n");
    }

    #[test]
    fn no_front_matter_is_all_body() {
        let (front, body) = split_front_matter("Just a body with $ARGUMENTS");
        assert!(front.description.is_none());
        assert_eq!(body, "Just a body with $ARGUMENTS");
    }

    #[test]
    fn seed_missing_directory_is_ok() {
        let reg = registry();
        let n = reg.seed_builtin(Path::new("/nonexistent/builtin")).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn seed_twice_leaves_set_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("plan.md"),
            "---\ndescription: plan it\n---\nPlan for: $ARGUMENTS\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("execute.md"), "Execute the plan.\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a template").unwrap();

        let reg = registry();
        assert_eq!(reg.seed_builtin(dir.path()).unwrap(), 2);
        assert_eq!(reg.seed_builtin(dir.path()).unwrap(), 2);

        let all = reg.list().unwrap();
        assert_eq!(all.len(), 2);
        let plan = reg.get("plan").unwrap().unwrap();
        assert_eq!(plan.description.as_deref(), Some("plan it"));
        assert!(plan.content.starts_with("Plan for:"));
    }
}
