//! The catalog: every known validation and stage, built once at startup.

use crate::catalog::loader::{
    CatalogLoader, FsCatalogLoader, StageDefinition, ValidationDefinition,
};
use crate::catalog::stage::{Stage, StageRunSummary, StageStopSummary};
use crate::catalog::validation::Validation;
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult, EntityKind};
use crate::core::types::{
    check_metadata_len, plan_id_of, Metadata, ResultId, ResultStatus, StageId, ValidationId,
    ValidationStatus,
};
use crate::execution::runner::{CommandTaskRunner, SharedRunner};
use crate::results::file_store::JsonFileResultStore;
use crate::results::model::{ResultUpdate, ValidationResult};
use crate::results::store::{MemoryResultStore, SharedStore};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Registry of validations and stages.
///
/// The set of entries never changes after construction; only the run
/// history of each validation does. Listings are ordered by id, numeric ids
/// first.
pub struct Catalog {
    validations: BTreeMap<ValidationId, Validation>,
    stages: BTreeMap<StageId, Stage>,
    store: SharedStore,
}

impl Catalog {
    /// Load definitions through `loader` and link them.
    pub fn load(
        loader: &dyn CatalogLoader,
        store: SharedStore,
        runner: SharedRunner,
    ) -> EngineResult<Self> {
        let validations = loader.load_validation_definitions()?;
        let stages = loader.load_stage_definitions()?;
        Self::from_definitions(validations, stages, store, runner)
    }

    /// Build the catalog, result store and runner described by `config`.
    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let store: SharedStore = match &config.results_path {
            Some(path) => Arc::new(JsonFileResultStore::open(path)?),
            None => MemoryResultStore::new_shared(),
        };
        let runner: SharedRunner = Arc::new(CommandTaskRunner::from_config(&config.runner));
        let loader = FsCatalogLoader::new(&config.base_dir);
        Self::load(&loader, store, runner)
    }

    /// Assign ids by sorted path, resolve stage includes and restore the
    /// run history already held by `store`.
    ///
    /// Any metadata entry over the size limit fails the whole build.
    pub fn from_definitions(
        mut validation_defs: Vec<ValidationDefinition>,
        mut stage_defs: Vec<StageDefinition>,
        store: SharedStore,
        runner: SharedRunner,
    ) -> EngineResult<Self> {
        validation_defs.sort_by(|a, b| a.path.cmp(&b.path));
        stage_defs.sort_by(|a, b| a.path.cmp(&b.path));

        let mut validations = BTreeMap::new();
        let mut by_path: HashMap<PathBuf, ValidationId> = HashMap::new();

        for (index, def) in validation_defs.into_iter().enumerate() {
            let id = ValidationId::new((index + 1).to_string());
            check_metadata_len("name", &def.name)?;
            check_metadata_len("description", &def.description)?;
            if let Some(reference) = &def.reference {
                check_metadata_len("ref", reference)?;
            }
            let metadata = Metadata::new(def.metadata)?;

            by_path.insert(normalize_path(&def.path), id.clone());
            let procedure = normalize_path(&def.procedure);

            let validation = Validation::new(
                id.clone(),
                def.name,
                def.description,
                procedure,
                def.requires_plan,
                metadata,
                store.clone(),
                runner.clone(),
            )
            .with_reference(def.reference);
            validations.insert(id, validation);
        }

        let mut stages = BTreeMap::new();
        for (index, def) in stage_defs.into_iter().enumerate() {
            let id = StageId::new((index + 1).to_string());
            let members = link_includes(&id, &def, &by_path);
            let stage = Stage::new(id.clone(), def.name, def.description, def.phase, members);
            stages.insert(id, stage);
        }

        log::info!(
            "Loaded catalog with {} validations and {} stages",
            validations.len(),
            stages.len()
        );

        let catalog = Self {
            validations,
            stages,
            store,
        };
        catalog.restore_history()?;
        Ok(catalog)
    }

    /// Seed each validation's run history from the store.
    ///
    /// A result still `running` belongs to a process that is gone; it is
    /// finalized as `canceled`.
    fn restore_history(&self) -> EngineResult<()> {
        let mut restored = 0;
        for result in self.store.query_all(None)? {
            let validation = match self.validations.get(&result.validation) {
                Some(validation) => validation,
                None => {
                    log::debug!(
                        "Skipping result {} of unknown validation {}",
                        result.id,
                        result.validation
                    );
                    continue;
                }
            };
            let result = if result.status == ResultStatus::Running {
                log::warn!(
                    "Validation {}: result {} was left running, marking it canceled",
                    result.validation,
                    result.id
                );
                self.store.update(
                    result.id,
                    ResultUpdate::finished(
                        ResultStatus::Canceled,
                        json!({ "description": "Validation was interrupted before it finished." }),
                    ),
                )?
            } else {
                result
            };
            if validation.restore_result(&result) {
                restored += 1;
            } else {
                log::debug!("Skipping result {} without the plan it needs", result.id);
            }
        }
        if restored > 0 {
            log::info!("Restored {} stored results", restored);
        }
        Ok(())
    }

    /// Look up a validation.
    pub fn get_validation(&self, id: &str) -> EngineResult<&Validation> {
        self.validations
            .get(&ValidationId::from(id))
            .ok_or_else(|| EngineError::not_found(EntityKind::Validation, id))
    }

    /// Look up a stage.
    pub fn get_stage(&self, id: &str) -> EngineResult<&Stage> {
        self.stages
            .get(&StageId::from(id))
            .ok_or_else(|| EngineError::not_found(EntityKind::Stage, id))
    }

    /// All validations ordered by id.
    pub fn all_validations(&self) -> impl Iterator<Item = &Validation> {
        self.validations.values()
    }

    /// All stages ordered by id.
    pub fn all_stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.values()
    }

    /// Number of validations.
    pub fn validation_count(&self) -> usize {
        self.validations.len()
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Result store shared by every validation.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn run_validation(&self, id: &str, plan_id: Option<&str>) -> EngineResult<ResultId> {
        self.get_validation(id)?.run(plan_id)
    }

    pub fn stop_validation(&self, id: &str, plan_id: Option<&str>) -> EngineResult<ResultId> {
        self.get_validation(id)?.stop(plan_id)
    }

    pub fn run_stage(&self, id: &str, plan_id: Option<&str>) -> EngineResult<StageRunSummary> {
        self.get_stage(id)?.run(self, plan_id)
    }

    pub fn stop_stage(&self, id: &str, plan_id: Option<&str>) -> EngineResult<StageStopSummary> {
        self.get_stage(id)?.stop(self, plan_id)
    }

    pub fn stage_status(
        &self,
        id: &str,
        plan_id: Option<&str>,
    ) -> EngineResult<ValidationStatus> {
        self.get_stage(id)?.status(self, plan_id)
    }

    /// Look up one result by its id.
    pub fn result(&self, id: &str) -> EngineResult<ValidationResult> {
        let result_id =
            ResultId::parse(id).ok_or_else(|| EngineError::not_found(EntityKind::Result, id))?;
        Ok(self.store.get(result_id)?)
    }

    /// Every stored result, optionally for one plan, ordered by creation time.
    pub fn results(&self, plan_id: Option<&str>) -> EngineResult<Vec<ValidationResult>> {
        Ok(self.store.query_all(plan_id_of(plan_id))?)
    }
}

/// Resolve a stage's includes to validation ids, skipping unknown paths and
/// repeats.
fn link_includes(
    stage: &StageId,
    def: &StageDefinition,
    by_path: &HashMap<PathBuf, ValidationId>,
) -> Vec<ValidationId> {
    let stage_dir = def.path.parent().unwrap_or_else(|| Path::new(""));
    let mut members: Vec<ValidationId> = Vec::with_capacity(def.included_paths.len());

    for include in &def.included_paths {
        let path = normalize_path(&stage_dir.join(include));
        match by_path.get(&path) {
            Some(id) if members.contains(id) => {}
            Some(id) => members.push(id.clone()),
            None => log::warn!(
                "Stage {} ({}) includes unknown validation {}",
                stage,
                def.path.display(),
                path.display()
            ),
        }
    }
    members
}

/// Fold `.` and `..` components without touching the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MAX_METADATA_LEN;
    use crate::core::error::TaskError;
    use crate::execution::cancel::CancellationToken;
    use crate::execution::runner::{RunContext, RunReport};
    use crate::results::store::ResultStore;
    use crate::testing::{
        stage_def, validation_def, wait_until, BlockingRunner, PlanRunner, StaticRunner,
    };

    fn three_validations() -> Vec<ValidationDefinition> {
        vec![
            validation_def("c-ntp.toml", "NTP", true),
            validation_def("a-ram.toml", "RAM", true),
            validation_def("b-disk.toml", "Disk", false),
        ]
    }

    fn catalog(runner: SharedRunner) -> Catalog {
        Catalog::from_definitions(
            three_validations(),
            vec![
                stage_def("pre.toml", "Pre", &["a-ram.toml", "b-disk.toml"]),
                stage_def(
                    "post.toml",
                    "Post",
                    &["b-disk.toml", "missing.toml", "b-disk.toml"],
                ),
            ],
            MemoryResultStore::new_shared(),
            runner,
        )
        .unwrap()
    }

    fn try_build(defs: Vec<ValidationDefinition>) -> EngineResult<Catalog> {
        Catalog::from_definitions(
            defs,
            Vec::new(),
            MemoryResultStore::new_shared(),
            StaticRunner::passing(),
        )
    }

    fn build(defs: Vec<ValidationDefinition>) -> Catalog {
        try_build(defs).unwrap()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/defs/stages/../validations/./a.toml")),
            PathBuf::from("/defs/validations/a.toml")
        );
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("../x/../y")), PathBuf::from("../y"));
        assert_eq!(normalize_path(Path::new("a/..")), PathBuf::from("."));
    }

    #[test]
    fn test_ids_follow_sorted_paths() {
        let catalog = catalog(StaticRunner::passing());
        let names: Vec<(&str, &str)> = catalog
            .all_validations()
            .map(|v| (v.id().as_str(), v.name()))
            .collect();
        assert_eq!(names, vec![("1", "RAM"), ("2", "Disk"), ("3", "NTP")]);

        let stages: Vec<(&str, &str)> = catalog
            .all_stages()
            .map(|s| (s.id().as_str(), s.name()))
            .collect();
        assert_eq!(stages, vec![("1", "Post"), ("2", "Pre")]);
    }

    #[test]
    fn test_listing_is_numeric() {
        let defs = (0..12)
            .map(|i| validation_def(&format!("v{:02}.toml", i), "V", false))
            .collect();
        let catalog = build(defs);
        let ids: Vec<&str> = catalog.all_validations().map(|v| v.id().as_str()).collect();
        assert_eq!(ids.first(), Some(&"1"));
        assert_eq!(ids[9], "10");
        assert_eq!(ids.last(), Some(&"12"));
    }

    #[test]
    fn test_stage_includes_are_linked() {
        let catalog = catalog(StaticRunner::passing());
        let pre = catalog.get_stage("2").unwrap();
        assert_eq!(pre.validation_ids(), &[ValidationId::from("1"), ValidationId::from("2")]);

        let post = catalog.get_stage("1").unwrap();
        assert_eq!(post.validation_ids(), &[ValidationId::from("2")]);
    }

    #[test]
    fn test_unknown_ids() {
        let catalog = catalog(StaticRunner::passing());
        assert!(matches!(
            catalog.get_validation("99"),
            Err(EngineError::NotFound { kind: EntityKind::Validation, .. })
        ));
        assert!(matches!(
            catalog.get_stage("99"),
            Err(EngineError::NotFound { kind: EntityKind::Stage, .. })
        ));
        assert!(matches!(
            catalog.result("not-a-uuid"),
            Err(EngineError::NotFound { kind: EntityKind::Result, .. })
        ));
        assert!(matches!(
            catalog.result(&ResultId::new().to_string()),
            Err(EngineError::NotFound { kind: EntityKind::Result, .. })
        ));
    }

    #[test]
    fn test_long_metadata_fails_the_load() {
        let mut defs = three_validations();
        defs[1].metadata.push(("groups".into(), "x".repeat(MAX_METADATA_LEN + 1)));
        let err = try_build(defs).err().unwrap();
        assert!(matches!(err, EngineError::MetadataTooLong { .. }));

        let mut defs = three_validations();
        defs[0].name = "n".repeat(MAX_METADATA_LEN + 1);
        let err = try_build(defs).err().unwrap();
        assert!(matches!(err, EngineError::MetadataTooLong { .. }));
    }

    #[test]
    fn test_run_plan_free_validation_end_to_end() {
        let catalog = catalog(StaticRunner::passing());
        let validation = catalog.get_validation("2").unwrap();
        assert!(!validation.requires_plan());

        catalog.run_validation("2", None).unwrap();
        validation.wait(None).unwrap();

        assert_eq!(validation.status(None).unwrap(), ValidationStatus::Success);
        let results = validation.results(None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].detailed_description, json!({"hostname": {"success": true}}));
    }

    #[test]
    fn test_concurrent_plans_end_to_end() {
        let catalog = catalog(PlanRunner::failing_for("plan1"));
        let validation = catalog.get_validation("1").unwrap();

        let failing = catalog.run_validation("1", Some("plan1")).unwrap();
        let passing = catalog.run_validation("1", Some("plan2")).unwrap();
        validation.wait(Some("plan1")).unwrap();
        validation.wait(Some("plan2")).unwrap();

        let all: Vec<ResultId> = validation
            .results(None)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert!(all.contains(&failing) && all.contains(&passing));

        let plan1 = validation.results(Some("plan1")).unwrap();
        assert_eq!(plan1.len(), 1);
        assert_eq!(plan1[0].id, failing);
        assert_eq!(plan1[0].status, ResultStatus::Failed);

        let plan1_store: Vec<ResultId> = catalog
            .results(Some("plan1"))
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(plan1_store, vec![failing]);
        assert_eq!(catalog.results(None).unwrap().len(), 2);
        assert_eq!(
            catalog.result(&passing.to_string()).unwrap().status,
            ResultStatus::Success
        );
    }

    #[test]
    fn test_stage_requires_plan_before_fanning_out() {
        let catalog = catalog(StaticRunner::passing());
        let err = catalog.run_stage("2", None).unwrap_err();
        assert!(matches!(err, EngineError::RequiresPlan { kind: EntityKind::Stage, .. }));
        assert!(matches!(
            catalog.stop_stage("2", Some("")),
            Err(EngineError::RequiresPlan { .. })
        ));
        assert!(catalog.results(None).unwrap().is_empty());
        assert_eq!(
            catalog.stage_status("2", None).unwrap(),
            ValidationStatus::RequiresPlanId
        );
    }

    #[test]
    fn test_stage_run_and_status() {
        let catalog = catalog(StaticRunner::passing());
        let overcloud = Some("overcloud");
        assert_eq!(catalog.stage_status("2", overcloud).unwrap(), ValidationStatus::New);

        let summary = catalog.run_stage("2", overcloud).unwrap();
        assert_eq!(summary.started.len(), 2);
        assert!(summary.failed.is_empty());

        catalog.get_stage("2").unwrap().wait(&catalog, overcloud).unwrap();
        assert_eq!(catalog.stage_status("2", overcloud).unwrap(), ValidationStatus::Success);
    }

    #[test]
    fn test_stage_runs_after_one_member_ran_alone() {
        let catalog = catalog(StaticRunner::passing());
        let overcloud = Some("overcloud");
        catalog.run_validation("2", None).unwrap();
        catalog.get_validation("2").unwrap().wait(None).unwrap();

        // One member `success`, the other `new`: no aggregate status.
        assert!(matches!(
            catalog.stage_status("2", overcloud),
            Err(EngineError::Internal(_))
        ));
        let views = catalog.stage_views(overcloud).unwrap();
        assert_eq!(views[1].status, None);

        let summary = catalog.run_stage("2", overcloud).unwrap();
        assert_eq!(summary.started.len(), 2);
        assert!(summary.failed.is_empty());
        catalog.get_stage("2").unwrap().wait(&catalog, overcloud).unwrap();
        assert_eq!(catalog.stage_status("2", overcloud).unwrap(), ValidationStatus::Success);
    }

    #[test]
    fn test_stage_already_running_and_stop() {
        let runner = BlockingRunner::new();
        let catalog = catalog(runner.clone());

        let overcloud = Some("overcloud");

        catalog.run_stage("2", overcloud).unwrap();
        assert!(wait_until(|| runner.started() == 2));
        assert_eq!(catalog.stage_status("2", overcloud).unwrap(), ValidationStatus::Running);
        assert!(matches!(
            catalog.run_stage("2", overcloud),
            Err(EngineError::AlreadyRunning { kind: EntityKind::Stage, .. })
        ));

        let stopped = catalog.stop_stage("2", overcloud).unwrap();
        assert_eq!(stopped.stopped.len(), 2);
        assert_eq!(catalog.stage_status("2", overcloud).unwrap(), ValidationStatus::Canceled);

        // Nothing left to stop: members that are not running are skipped.
        let stopped = catalog.stop_stage("2", overcloud).unwrap();
        assert!(stopped.stopped.is_empty() && stopped.failed.is_empty());

        catalog.get_stage("2").unwrap().wait(&catalog, overcloud).unwrap();
    }

    #[test]
    fn test_stage_sees_plan_free_member_running() {
        let runner = BlockingRunner::new();
        let catalog = catalog(runner.clone());

        // Member "2" ignores plans, so a run under another plan holds its slot.
        catalog.run_validation("2", Some("other")).unwrap();
        assert_eq!(
            catalog.stage_status("2", Some("overcloud")).unwrap(),
            ValidationStatus::Running
        );
        let err = catalog.run_stage("2", Some("overcloud")).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRunning { .. }));
        assert!(!catalog.get_validation("1").unwrap().is_running(Some("overcloud")));

        runner.release();
        catalog.get_validation("2").unwrap().wait(None).unwrap();
    }

    #[test]
    fn test_load_from_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let write = |rel: &str, text: &str| {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, text).unwrap();
        };
        write(
            "validations/ram.toml",
            "procedure = \"../playbooks/ram.yaml\"\n\
             [metadata]\nname = \"RAM\"\nrequire_plan = false",
        );
        write("validations/ntp.toml", "[metadata]\nname = \"NTP\"");
        write(
            "stages/pre.toml",
            "include = [\"../validations/ram.toml\", \"./../validations/ntp.toml\"]\n\
             [metadata]\nname = \"Pre\"",
        );

        let config = EngineConfig::new().with_base_dir(dir.path());
        let catalog = Catalog::from_config(&config).unwrap();
        assert_eq!(catalog.validation_count(), 2);
        assert_eq!(catalog.get_validation("1").unwrap().name(), "NTP");
        assert_eq!(
            catalog.get_validation("2").unwrap().procedure(),
            dir.path().join("playbooks").join("ram.yaml")
        );
        assert_eq!(
            catalog.get_validation("1").unwrap().procedure(),
            dir.path().join("validations").join("ntp.toml")
        );
        assert_eq!(
            catalog.get_stage("1").unwrap().validation_ids(),
            &[ValidationId::from("2"), ValidationId::from("1")]
        );
    }

    #[test]
    fn test_runner_receives_the_procedure_path() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let record = move |ctx: &RunContext<'_>,
                           _token: &CancellationToken|
              -> Result<RunReport, TaskError> {
            recorder.lock().push(ctx.procedure.to_path_buf());
            Ok(RunReport::new())
        };
        let runner: SharedRunner = Arc::new(record);
        let mut def = validation_def("ram.toml", "RAM", false);
        def.procedure = PathBuf::from("/defs/validations/../playbooks/ram.yaml");
        let catalog = Catalog::from_definitions(
            vec![def],
            Vec::new(),
            MemoryResultStore::new_shared(),
            runner,
        )
        .unwrap();

        catalog.run_validation("1", None).unwrap();
        catalog.get_validation("1").unwrap().wait(None).unwrap();
        assert_eq!(*seen.lock(), vec![PathBuf::from("/defs/playbooks/ram.yaml")]);
    }

    fn file_backed(path: &Path) -> Catalog {
        let store: SharedStore = Arc::new(JsonFileResultStore::open(path).unwrap());
        Catalog::from_definitions(three_validations(), Vec::new(), store, StaticRunner::passing())
            .unwrap()
    }

    #[test]
    fn test_history_survives_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");

        let (disk_run, ram_run) = {
            let catalog = file_backed(&path);
            let disk_run = catalog.run_validation("2", None).unwrap();
            catalog.get_validation("2").unwrap().wait(None).unwrap();
            let ram_run = catalog.run_validation("1", Some("overcloud")).unwrap();
            catalog.get_validation("1").unwrap().wait(Some("overcloud")).unwrap();
            (disk_run, ram_run)
        };

        let catalog = file_backed(&path);
        let disk = catalog.get_validation("2").unwrap();
        assert_eq!(disk.status(None).unwrap(), ValidationStatus::Success);
        assert_eq!(disk.result_ids(None), vec![disk_run]);

        let ram = catalog.get_validation("1").unwrap();
        assert_eq!(ram.status(Some("overcloud")).unwrap(), ValidationStatus::Success);
        assert_eq!(ram.status(Some("undercloud")).unwrap(), ValidationStatus::New);
        assert_eq!(ram.result_ids(None), vec![ram_run]);
        let ntp = catalog.get_validation("3").unwrap();
        assert_eq!(ntp.status(Some("overcloud")).unwrap(), ValidationStatus::New);
    }

    #[test]
    fn test_stale_running_result_is_canceled_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let stale = ValidationResult::running(ValidationId::from("2"), None);
        {
            let store = JsonFileResultStore::open(&path).unwrap();
            store.insert(stale.clone()).unwrap();
        }

        let catalog = file_backed(&path);
        let disk = catalog.get_validation("2").unwrap();
        assert_eq!(disk.status(None).unwrap(), ValidationStatus::Canceled);
        assert!(!disk.is_running(None));
        assert_eq!(
            catalog.result(&stale.id.to_string()).unwrap().status,
            ResultStatus::Canceled
        );

        let next = catalog.run_validation("2", None).unwrap();
        disk.wait(None).unwrap();
        assert_eq!(disk.result_ids(None), vec![stale.id, next]);
        assert_eq!(disk.status(None).unwrap(), ValidationStatus::Success);
    }
}
