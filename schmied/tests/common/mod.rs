//! Shared fixtures: a temporary project tree, scripted insertables and a
//! recording assembler.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use convenient_asar::{AsarError, AsarResult, PatchAssembler, PatchParams, PatchReport};
use tempfile::TempDir;

use schmied::insertable::{Insertable, InsertableFactory};
use schmied::{
    Configuration, ConfigurationDependency, Descriptor, InsertionError, ResourceDependency,
};

pub struct Project {
    _dir: TempDir,
    pub root: PathBuf,
    pub config: Configuration,
}

impl Project {
    /// A project tree with a base ROM, a previous output ROM and the given
    /// manifest body.
    pub fn new(manifest: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();

        std::fs::write(root.join("clean.sfc"), vec![0u8; 0x8000]).unwrap();
        std::fs::create_dir_all(root.join("out")).unwrap();
        std::fs::write(root.join("out/hack.sfc"), vec![0x42u8; 0x8000]).unwrap();

        let config = Configuration::from_str(manifest, &root).unwrap();
        Self {
            _dir: dir,
            root,
            config,
        }
    }

    pub fn write_file(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// A level file carrying `number` in its internal header field.
    pub fn write_level_file(&self, relative: &str, number: u16) -> PathBuf {
        let mut bytes = vec![0u8; 0x12];
        bytes[0x10..].copy_from_slice(&number.to_le_bytes());
        self.write_file(relative, &bytes)
    }

    pub fn report_path(&self) -> PathBuf {
        schmied::paths::build_report(&self.root)
    }

    pub fn output_rom_bytes(&self) -> Vec<u8> {
        std::fs::read(&self.config.output_rom).unwrap()
    }

    /// Dependency record matching the file's current state on disk.
    pub fn observed_dep(&self, relative: &str) -> ResourceDependency {
        ResourceDependency::observed(self.root.join(relative), schmied::Policy::Reinsert)
    }

    /// Dependency record whose token disagrees with the file on disk,
    /// marking the owning step for re-insertion.
    pub fn stale_dep(&self, relative: &str) -> ResourceDependency {
        let mut dep = self.observed_dep(relative);
        dep.last_write_time = Some(dep.last_write_time.map(|t| t + 1).unwrap_or(1));
        dep
    }
}

#[derive(Clone, Default)]
pub struct StepSpec {
    pub label: String,
    pub resource_deps: Vec<ResourceDependency>,
    pub config_deps: Vec<ConfigurationDependency>,
    pub hijacks: Option<Vec<(usize, usize)>>,
    pub emitted: Vec<PathBuf>,
    /// Opt out of dependency reporting after performing the side effect.
    pub no_report: bool,
}

impl StepSpec {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Self::default()
        }
    }
}

pub struct FakeStep {
    spec: StepSpec,
    log: Rc<RefCell<Vec<String>>>,
}

impl Insertable for FakeStep {
    fn init(&mut self) -> Result<(), InsertionError> {
        self.log.borrow_mut().push(format!("init:{}", self.spec.label));
        Ok(())
    }

    fn insert(&mut self) -> Result<(), InsertionError> {
        self.log
            .borrow_mut()
            .push(format!("insert:{}", self.spec.label));
        Ok(())
    }

    fn insert_with_dependency_report(
        &mut self,
    ) -> Result<HashSet<ResourceDependency>, InsertionError> {
        self.log
            .borrow_mut()
            .push(format!("insert_with_report:{}", self.spec.label));
        if self.spec.no_report {
            return Err(InsertionError::NoDependencyReport(format!(
                "step '{}' cannot produce a dependency report",
                self.spec.label
            )));
        }
        Ok(self.spec.resource_deps.iter().cloned().collect())
    }

    fn configuration_dependencies(&self) -> HashSet<ConfigurationDependency> {
        self.spec.config_deps.iter().cloned().collect()
    }

    fn hijacks(&self) -> Option<&[(usize, usize)]> {
        self.spec.hijacks.as_deref()
    }

    fn emitted_outputs(&self) -> Vec<PathBuf> {
        self.spec.emitted.clone()
    }
}

/// Factory handing out scripted steps and recording every construction.
pub struct FakeFactory {
    steps: HashMap<Descriptor, StepSpec>,
    pub log: Rc<RefCell<Vec<String>>>,
}

impl FakeFactory {
    pub fn new(steps: Vec<(Descriptor, StepSpec)>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn events(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.starts_with("create:"))
            .collect()
    }
}

impl InsertableFactory for FakeFactory {
    fn create(
        &self,
        descriptor: &Descriptor,
        _config: &Configuration,
    ) -> Result<Box<dyn Insertable>, InsertionError> {
        self.log.borrow_mut().push(format!("create:{descriptor}"));
        let spec = self.steps.get(descriptor).cloned().ok_or_else(|| {
            InsertionError::Failed(format!("no scripted step for {descriptor}"))
        })?;
        Ok(Box::new(FakeStep {
            spec,
            log: self.log.clone(),
        }))
    }
}

/// Assembler recording every patch source it is handed.
#[derive(Default)]
pub struct FakeAssembler {
    pub patches: Vec<String>,
    pub fail: bool,
}

impl PatchAssembler for FakeAssembler {
    fn init(&mut self) -> AsarResult<()> {
        Ok(())
    }

    fn patch(&mut self, params: PatchParams<'_>) -> AsarResult<PatchReport> {
        let text = std::fs::read_to_string(params.patch_path).unwrap_or_default();
        self.patches.push(text);
        if self.fail {
            return Err(AsarError::PatchFailed {
                patch: params.patch_path.to_path_buf(),
                messages: "scripted failure".into(),
            });
        }
        Ok(PatchReport::default())
    }
}

/// Write a cleanup sidecar for `module_source`, one decimal address per
/// line.
pub fn write_cleanup_sidecar(root: &Path, module_source: &Path, addresses: &[usize]) {
    let sidecar = schmied::paths::module_cleanup_file(root, module_source);
    std::fs::create_dir_all(sidecar.parent().unwrap()).unwrap();
    let lines: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
    std::fs::write(sidecar, lines.join("\n")).unwrap();
}
