//! Definition and version management.
//!
//! Versions are immutable once created; publishing a version archives the
//! previously published one in the same transaction. Publishing and
//! archiving only affect new starts; running instances keep their pinned
//! version.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::graph::{WorkflowFile, WorkflowGraph};
use crate::model::{WorkflowDefinition, WorkflowVersion};
use crate::registry::Registry;
use crate::store::WorkflowStorage;

/// A published version plus non-fatal findings about its graph.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedVersion {
    pub version: WorkflowVersion,
    pub warnings: Vec<String>,
}

/// Result of importing a workflow file.
#[derive(Debug, Clone, Serialize)]
pub struct ImportedWorkflow {
    pub definition: WorkflowDefinition,
    pub version: WorkflowVersion,
    /// Whether the definition was created by this import.
    pub created: bool,
    pub warnings: Vec<String>,
}

/// Administrative operations on definitions and versions.
pub struct DefinitionService {
    store: Arc<dyn WorkflowStorage>,
    registry: Arc<Registry>,
}

impl DefinitionService {
    pub fn new(store: Arc<dyn WorkflowStorage>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    /// Create a definition. Fails with `DuplicateSlug` if the slug exists.
    pub fn create_definition(
        &self,
        slug: &str,
        name: &str,
        trigger_type: &str,
        description: &str,
    ) -> Result<WorkflowDefinition> {
        validate_slug(slug)?;
        if name.trim().is_empty() {
            return Err(WorkflowError::InvalidDefinition("name cannot be empty".into()));
        }

        let now = Utc::now();
        let definition = WorkflowDefinition {
            id: Uuid::new_v4().to_string(),
            slug: slug.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            trigger_type: trigger_type.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_definition(&definition)?;
        info!(slug, definition_id = %definition.id, "Workflow definition created");
        Ok(definition)
    }

    /// Look a definition up by slug, then by id.
    pub fn get_definition(&self, slug_or_id: &str) -> Result<WorkflowDefinition> {
        if let Some(definition) = self.store.find_definition_by_slug(slug_or_id)? {
            return Ok(definition);
        }
        self.store
            .get_definition(slug_or_id)?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(slug_or_id.to_string()))
    }

    pub fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>> {
        self.store.list_definitions()
    }

    pub fn list_versions(&self, definition_id: &str) -> Result<Vec<WorkflowVersion>> {
        self.store.list_versions(definition_id)
    }

    /// Add a draft version. Drafts are not validated until published.
    pub fn create_version(&self, definition_id: &str, graph: &WorkflowGraph) -> Result<WorkflowVersion> {
        let version = self.store.create_version(definition_id, graph)?;
        info!(
            definition_id,
            version_id = %version.id,
            version_number = version.version_number,
            "Workflow version created"
        );
        Ok(version)
    }

    /// Validate a version against the registry and publish it.
    pub fn publish_version(&self, version_id: &str) -> Result<PublishedVersion> {
        let version = self
            .store
            .get_version(version_id)?
            .ok_or_else(|| WorkflowError::VersionNotFound(version_id.to_string()))?;

        version.graph.validate_against(&self.registry)?;
        let warnings = version.graph.warnings();
        for warning in &warnings {
            warn!(version_id, "{}", warning);
        }

        let version = self.store.publish_version(version_id)?;
        info!(
            definition_id = %version.definition_id,
            version_id,
            version_number = version.version_number,
            "Workflow version published"
        );
        Ok(PublishedVersion { version, warnings })
    }

    pub fn archive_version(&self, version_id: &str) -> Result<()> {
        if !self.store.archive_version(version_id)? {
            return Err(WorkflowError::VersionNotFound(version_id.to_string()));
        }
        info!(version_id, "Workflow version archived");
        Ok(())
    }

    /// Soft-disable a definition; new starts fail with `DefinitionInactive`.
    pub fn deactivate_definition(&self, slug_or_id: &str) -> Result<WorkflowDefinition> {
        self.set_active(slug_or_id, false)
    }

    pub fn activate_definition(&self, slug_or_id: &str) -> Result<WorkflowDefinition> {
        self.set_active(slug_or_id, true)
    }

    fn set_active(&self, slug_or_id: &str, active: bool) -> Result<WorkflowDefinition> {
        let mut definition = self.get_definition(slug_or_id)?;
        if !self.store.set_definition_active(&definition.id, active)? {
            return Err(WorkflowError::DefinitionNotFound(slug_or_id.to_string()));
        }
        definition.is_active = active;
        info!(slug = %definition.slug, active, "Workflow definition activation changed");
        Ok(definition)
    }

    /// Import a workflow file: create the definition if needed, add a
    /// version, and optionally publish it.
    pub fn import(&self, file: &WorkflowFile, publish: bool) -> Result<ImportedWorkflow> {
        let header = &file.definition;
        let graph = file.graph();
        // Fail before creating anything if the graph is unusable.
        graph.validate_against(&self.registry)?;

        let (definition, created) = match self.store.find_definition_by_slug(&header.slug)? {
            Some(existing) => (existing, false),
            None => {
                let definition = self.create_definition(
                    &header.slug,
                    &header.name,
                    &header.trigger_type,
                    &header.description,
                )?;
                (definition, true)
            }
        };

        let version = self.create_version(&definition.id, &graph)?;
        let (version, warnings) = if publish {
            let published = self.publish_version(&version.id)?;
            (published.version, published.warnings)
        } else {
            (version, graph.warnings())
        };

        Ok(ImportedWorkflow {
            definition,
            version,
            created,
            warnings,
        })
    }
}

/// Slugs are lowercase ASCII letters, digits, `-` and `_`.
fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() {
        return Err(WorkflowError::InvalidDefinition("slug cannot be empty".into()));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(WorkflowError::InvalidDefinition(format!(
            "slug '{}' may only contain lowercase letters, digits, '-' and '_'",
            slug
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, NodeKind, NodeSpec};
    use crate::model::VersionStatus;
    use crate::store::WorkflowStore;

    fn service() -> DefinitionService {
        DefinitionService::new(
            Arc::new(WorkflowStore::open_in_memory().unwrap()),
            Arc::new(Registry::with_core().unwrap()),
        )
    }

    fn graph() -> WorkflowGraph {
        WorkflowGraph::new()
            .with_node("start", NodeSpec::new(NodeKind::Trigger).with_edge(Edge::new("note")))
            .with_node(
                "note",
                NodeSpec::new(NodeKind::Action)
                    .with_action("core.set")
                    .with_edge(Edge::new("done")),
            )
            .with_node("done", NodeSpec::new(NodeKind::End))
    }

    #[test]
    fn test_create_and_lookup() {
        let svc = service();
        let def = svc
            .create_definition("award-rec", "Award recommendation", "manual", "")
            .unwrap();
        assert_eq!(svc.get_definition("award-rec").unwrap().id, def.id);
        assert_eq!(svc.get_definition(&def.id).unwrap().slug, "award-rec");
        assert!(matches!(
            svc.get_definition("nope").unwrap_err(),
            WorkflowError::DefinitionNotFound(_)
        ));
    }

    #[test]
    fn test_duplicate_slug() {
        let svc = service();
        svc.create_definition("warrant", "Warrant", "manual", "").unwrap();
        assert!(matches!(
            svc.create_definition("warrant", "Again", "manual", "").unwrap_err(),
            WorkflowError::DuplicateSlug(_)
        ));
    }

    #[test]
    fn test_invalid_slug() {
        let svc = service();
        assert!(matches!(
            svc.create_definition("Has Spaces", "x", "manual", "").unwrap_err(),
            WorkflowError::InvalidDefinition(_)
        ));
        assert!(svc.create_definition("", "x", "manual", "").is_err());
    }

    #[test]
    fn test_publish_validates_against_registry() {
        let svc = service();
        let def = svc.create_definition("auth", "Authorization", "event", "").unwrap();
        let bad = graph().with_node(
            "note",
            NodeSpec::new(NodeKind::Action)
                .with_action("plugin.missing")
                .with_edge(Edge::new("done")),
        );
        let version = svc.create_version(&def.id, &bad).unwrap();
        let err = svc.publish_version(&version.id).unwrap_err();
        assert!(err.to_string().contains("unregistered key 'plugin.missing'"));
        assert_eq!(
            svc.list_versions(&def.id).unwrap()[0].status,
            VersionStatus::Draft
        );
    }

    #[test]
    fn test_publish_second_version_archives_first() {
        let svc = service();
        let def = svc.create_definition("hire", "Hire", "manual", "").unwrap();
        let v1 = svc.create_version(&def.id, &graph()).unwrap();
        let v2 = svc.create_version(&def.id, &graph()).unwrap();
        svc.publish_version(&v1.id).unwrap();
        svc.publish_version(&v2.id).unwrap();

        let versions = svc.list_versions(&def.id).unwrap();
        assert_eq!(versions[0].status, VersionStatus::Archived);
        assert_eq!(versions[1].status, VersionStatus::Published);
    }

    #[test]
    fn test_archive_unknown_version() {
        let svc = service();
        assert!(matches!(
            svc.archive_version("nope").unwrap_err(),
            WorkflowError::VersionNotFound(_)
        ));
    }

    #[test]
    fn test_deactivate_and_activate() {
        let svc = service();
        svc.create_definition("hire", "Hire", "manual", "").unwrap();
        assert!(!svc.deactivate_definition("hire").unwrap().is_active);
        assert!(!svc.get_definition("hire").unwrap().is_active);
        assert!(svc.activate_definition("hire").unwrap().is_active);
    }

    #[test]
    fn test_import_creates_then_adds_versions() {
        let svc = service();
        let file = WorkflowFile::from_toml(
            r#"
[definition]
slug = "officer-hire"
name = "Officer hire"

[nodes.start]
type = "trigger"
edges = [{ target = "done" }]

[nodes.done]
type = "end"
"#,
        )
        .unwrap();

        let first = svc.import(&file, true).unwrap();
        assert!(first.created);
        assert_eq!(first.version.status, VersionStatus::Published);

        let second = svc.import(&file, false).unwrap();
        assert!(!second.created);
        assert_eq!(second.version.version_number, 2);
        assert_eq!(second.version.status, VersionStatus::Draft);
    }
}
