// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Name-based weight restoration.
//!
//! A [`ParameterStore`] maps names to tensors. Restoring it into a live
//! network happens in two phases: [`plan_restore`] decides, without touching
//! the network, which store entry feeds which variable; [`apply_plan`] then
//! validates every scheduled assignment and writes them as one batch.
//! Which key feeds which variable is delegated to a [`NameMatcher`].

use crate::io::{read_state_dict, write_state_dict, SnapshotFormat};
use crate::module::Module;
use crate::{PureResult, Tensor, TensorError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Errors raised while loading, planning or applying a restore.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("parameter store {} does not exist", .path.display())]
    NotFound { path: PathBuf },
    #[error("parameter store {} is corrupt: {message}", .path.display())]
    Corrupt { path: PathBuf, message: String },
    #[error("failed to access parameter store {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("variable '{variable}' matches several store keys: {keys:?}")]
    AmbiguousMatch { variable: String, keys: Vec<String> },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// What to do when a variable matches more than one store key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// The last matching key in store order wins. Every ambiguity is logged.
    #[default]
    LastMatchWins,
    /// Any ambiguity aborts the restore before anything is written.
    Reject,
}

/// What to do when the store file does not exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStorePolicy {
    /// Keep the current values and report [`RestoreOutcome::Skipped`].
    #[default]
    Skip,
    /// Fail with [`RestoreError::NotFound`].
    Fail,
}

/// Immutable name to tensor mapping iterated in lexicographic key order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterStore {
    entries: BTreeMap<String, Tensor>,
}

/// Result of looking for a store on disk.
#[derive(Debug)]
pub enum StoreLoad {
    Loaded(ParameterStore),
    NotFound { path: PathBuf },
}

impl ParameterStore {
    pub fn new(entries: BTreeMap<String, Tensor>) -> Self {
        Self { entries }
    }

    /// Reads a store, reporting absence as [`StoreLoad::NotFound`] rather than
    /// an error. Undecodable contents are [`RestoreError::Corrupt`].
    pub fn load(path: impl AsRef<Path>) -> Result<StoreLoad, RestoreError> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(StoreLoad::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(RestoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let metadata = file.metadata().map_err(|source| RestoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(RestoreError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(ErrorKind::InvalidInput, "not a regular file"),
            });
        }
        let entries = read_state_dict(BufReader::new(file), SnapshotFormat::from_path(path))
            .map_err(|err| RestoreError::Corrupt {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        debug!(path = %path.display(), entries = entries.len(), "loaded parameter store");
        Ok(StoreLoad::Loaded(Self { entries }))
    }

    /// Persists the store, choosing the encoding from the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RestoreError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| RestoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        write_state_dict(&self.entries, &mut writer, SnapshotFormat::from_path(path))?;
        writer.flush().map_err(io_err)
    }

    pub fn get(&self, key: &str) -> Option<&Tensor> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Tensor)> for ParameterStore {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Read-only description of one live variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveVariable {
    /// Parameter name, e.g. `shufflenet_encoder/conv1/weights`.
    pub name: String,
    /// Name with the live suffix, e.g. `shufflenet_encoder/conv1/weights:0`.
    pub live_name: String,
    pub shape: (usize, usize),
}

/// Access to the named tensors of a constructed network.
pub trait LiveVariables {
    /// Every variable in visit order.
    fn live_variables(&self) -> PureResult<Vec<LiveVariable>>;

    /// Copies the values of the named variables.
    fn read_variables(&self, names: &BTreeSet<String>) -> PureResult<BTreeMap<String, Tensor>>;

    /// Writes every assignment or none of them. All targets must exist and
    /// keep their shape; the first violation aborts before any write.
    fn assign_batch(&mut self, assignments: &BTreeMap<String, Tensor>) -> PureResult<usize>;
}

impl<M: Module + ?Sized> LiveVariables for M {
    fn live_variables(&self) -> PureResult<Vec<LiveVariable>> {
        let mut variables = Vec::new();
        self.visit_parameters(&mut |param| {
            variables.push(LiveVariable {
                name: param.name().to_string(),
                live_name: param.live_name(),
                shape: param.value().shape(),
            });
            Ok(())
        })?;
        Ok(variables)
    }

    fn read_variables(&self, names: &BTreeSet<String>) -> PureResult<BTreeMap<String, Tensor>> {
        let mut values = BTreeMap::new();
        self.visit_parameters(&mut |param| {
            if names.contains(param.name()) {
                values.insert(param.name().to_string(), param.value().clone());
            }
            Ok(())
        })?;
        Ok(values)
    }

    fn assign_batch(&mut self, assignments: &BTreeMap<String, Tensor>) -> PureResult<usize> {
        let mut seen = BTreeSet::new();
        self.visit_parameters(&mut |param| {
            if let Some(value) = assignments.get(param.name()) {
                param.check_shape(value)?;
                seen.insert(param.name().to_string());
            }
            Ok(())
        })?;
        if let Some(missing) = assignments.keys().find(|name| !seen.contains(*name)) {
            return Err(TensorError::MissingParameter {
                name: missing.clone(),
            });
        }
        let mut written = 0usize;
        self.visit_parameters_mut(&mut |param| {
            if let Some(value) = assignments.get(param.name()) {
                param.load_value(value)?;
                written += 1;
            }
            Ok(())
        })?;
        Ok(written)
    }
}

/// Decides whether a store key addresses a live variable.
pub trait NameMatcher {
    fn matches(&self, key: &str, variable: &LiveVariable) -> bool;
}

/// Compatibility matcher for stores keyed by partial variable paths: a key
/// matches when `key + ":"` occurs anywhere in the live name. The colon
/// anchors the key to the end of the variable path, so `conv1` matches
/// `net/conv1:0` but neither `net/conv1b:0` nor optimiser slots such as
/// `net/conv1/Momentum:0`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LegacySubstringMatcher;

impl NameMatcher for LegacySubstringMatcher {
    fn matches(&self, key: &str, variable: &LiveVariable) -> bool {
        variable.live_name.contains(&format!("{key}:"))
    }
}

/// Structured matcher: the key must equal the parameter name.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactMatcher;

impl NameMatcher for ExactMatcher {
    fn matches(&self, key: &str, variable: &LiveVariable) -> bool {
        key == variable.name
    }
}

/// One scheduled write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedAssignment {
    pub variable: String,
    pub key: String,
}

/// A variable that matched several keys, in store order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ambiguity {
    pub variable: String,
    pub keys: Vec<String>,
}

/// Outcome of the planning phase. Building a plan never mutates anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestorePlan {
    assignments: Vec<PlannedAssignment>,
    ambiguities: Vec<Ambiguity>,
    unmatched_variables: Vec<String>,
    unused_keys: Vec<String>,
}

impl RestorePlan {
    pub fn assignments(&self) -> &[PlannedAssignment] {
        &self.assignments
    }

    pub fn ambiguities(&self) -> &[Ambiguity] {
        &self.ambiguities
    }

    /// Variables that no key matched; they keep their current value.
    pub fn unmatched_variables(&self) -> &[String] {
        &self.unmatched_variables
    }

    /// Store keys that matched no variable.
    pub fn unused_keys(&self) -> &[String] {
        &self.unused_keys
    }

    /// Key scheduled for `variable`, if any.
    pub fn key_for(&self, variable: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|assignment| assignment.variable == variable)
            .map(|assignment| assignment.key.as_str())
    }
}

/// Matches every variable against every store key. A variable matched by
/// several keys is assigned from the last one in store order and the
/// collision is recorded.
pub fn plan_restore<N: NameMatcher + ?Sized>(
    store: &ParameterStore,
    variables: &[LiveVariable],
    matcher: &N,
) -> RestorePlan {
    let mut plan = RestorePlan::default();
    let mut used = BTreeSet::new();
    for variable in variables {
        let matched: Vec<&str> = store
            .keys()
            .filter(|key| matcher.matches(key, variable))
            .collect();
        let Some(last) = matched.last() else {
            plan.unmatched_variables.push(variable.name.clone());
            continue;
        };
        if matched.len() > 1 {
            plan.ambiguities.push(Ambiguity {
                variable: variable.name.clone(),
                keys: matched.iter().map(|key| key.to_string()).collect(),
            });
        }
        used.extend(matched.iter().map(|key| key.to_string()));
        plan.assignments.push(PlannedAssignment {
            variable: variable.name.clone(),
            key: last.to_string(),
        });
    }
    plan.unused_keys = store
        .keys()
        .filter(|key| !used.contains(*key))
        .map(str::to_string)
        .collect();
    plan
}

/// Summary of an applied restore.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub assigned: usize,
    pub unmatched_variables: usize,
    pub unused_keys: usize,
    pub ambiguities: Vec<Ambiguity>,
}

/// Result of restoring from a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(RestoreReport),
    /// The store was absent and the policy allowed skipping.
    Skipped { path: PathBuf },
}

/// Applies a plan as one batched assignment.
pub fn apply_plan<V: LiveVariables + ?Sized>(
    plan: &RestorePlan,
    store: &ParameterStore,
    target: &mut V,
    policy: AmbiguityPolicy,
) -> Result<RestoreReport, RestoreError> {
    if policy == AmbiguityPolicy::Reject {
        if let Some(ambiguity) = plan.ambiguities.first() {
            return Err(RestoreError::AmbiguousMatch {
                variable: ambiguity.variable.clone(),
                keys: ambiguity.keys.clone(),
            });
        }
    }
    for ambiguity in &plan.ambiguities {
        warn!(
            variable = %ambiguity.variable,
            keys = ?ambiguity.keys,
            "variable matches several store keys; using the last"
        );
    }
    let mut batch = BTreeMap::new();
    for assignment in &plan.assignments {
        let value = store
            .get(&assignment.key)
            .ok_or_else(|| TensorError::MissingParameter {
                name: assignment.key.clone(),
            })?;
        batch.insert(assignment.variable.clone(), value.clone());
    }
    let assigned = target.assign_batch(&batch)?;
    Ok(RestoreReport {
        assigned,
        unmatched_variables: plan.unmatched_variables.len(),
        unused_keys: plan.unused_keys.len(),
        ambiguities: plan.ambiguities.clone(),
    })
}

/// Loads parameter stores into live networks and exports live values back.
#[derive(Clone, Debug, Default)]
pub struct WeightRestorer<N = LegacySubstringMatcher> {
    matcher: N,
    ambiguity: AmbiguityPolicy,
    missing: MissingStorePolicy,
}

impl WeightRestorer<LegacySubstringMatcher> {
    /// Restorer using [`LegacySubstringMatcher`] and the default policies.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<N: NameMatcher> WeightRestorer<N> {
    pub fn with_matcher<M: NameMatcher>(self, matcher: M) -> WeightRestorer<M> {
        WeightRestorer {
            matcher,
            ambiguity: self.ambiguity,
            missing: self.missing,
        }
    }

    pub fn with_ambiguity_policy(mut self, policy: AmbiguityPolicy) -> Self {
        self.ambiguity = policy;
        self
    }

    pub fn with_missing_store_policy(mut self, policy: MissingStorePolicy) -> Self {
        self.missing = policy;
        self
    }

    pub fn plan<V: LiveVariables + ?Sized>(
        &self,
        store: &ParameterStore,
        target: &V,
    ) -> Result<RestorePlan, RestoreError> {
        let variables = target.live_variables()?;
        Ok(plan_restore(store, &variables, &self.matcher))
    }

    /// Plans and applies `store` in one step.
    pub fn restore<V: LiveVariables + ?Sized>(
        &self,
        store: &ParameterStore,
        target: &mut V,
    ) -> Result<RestoreReport, RestoreError> {
        let plan = self.plan(store, target)?;
        let report = apply_plan(&plan, store, target, self.ambiguity)?;
        info!(
            assigned = report.assigned,
            unmatched = report.unmatched_variables,
            unused_keys = report.unused_keys,
            ambiguous = report.ambiguities.len(),
            "restored parameters"
        );
        Ok(report)
    }

    /// Loads the store at `path` and restores it, honouring the missing-store policy.
    pub fn restore_from_path<V: LiveVariables + ?Sized>(
        &self,
        path: impl AsRef<Path>,
        target: &mut V,
    ) -> Result<RestoreOutcome, RestoreError> {
        match ParameterStore::load(path)? {
            StoreLoad::Loaded(store) => self.restore(&store, target).map(RestoreOutcome::Restored),
            StoreLoad::NotFound { path } => match self.missing {
                MissingStorePolicy::Skip => {
                    warn!(path = %path.display(), "no pretrained parameter store; skipping restore");
                    Ok(RestoreOutcome::Skipped { path })
                }
                MissingStorePolicy::Fail => Err(RestoreError::NotFound { path }),
            },
        }
    }

    /// Narrows `source` to the keys that address a live variable and fills
    /// them with the current live values. When a key addresses several
    /// variables the last one in visit order provides the value.
    pub fn export<V: LiveVariables + ?Sized>(
        &self,
        target: &V,
        source: &ParameterStore,
    ) -> Result<ParameterStore, RestoreError> {
        let variables = target.live_variables()?;
        let mut chosen: BTreeMap<String, String> = BTreeMap::new();
        for variable in &variables {
            for key in source.keys() {
                if self.matcher.matches(key, variable) {
                    chosen.insert(key.to_string(), variable.name.clone());
                }
            }
        }
        let names: BTreeSet<String> = chosen.values().cloned().collect();
        let values = target.read_variables(&names)?;
        let mut entries = BTreeMap::new();
        for (key, name) in chosen {
            let value = values
                .get(&name)
                .ok_or_else(|| TensorError::MissingParameter { name: name.clone() })?;
            entries.insert(key, value.clone());
        }
        let skipped = source.len() - entries.len();
        if skipped > 0 {
            debug!(skipped, "store keys without a live variable were not exported");
        }
        Ok(ParameterStore::new(entries))
    }

    /// [`WeightRestorer::export`] followed by [`ParameterStore::save`].
    pub fn export_to_path<V: LiveVariables + ?Sized>(
        &self,
        target: &V,
        source: &ParameterStore,
        path: impl AsRef<Path>,
    ) -> Result<ParameterStore, RestoreError> {
        let exported = self.export(target, source)?;
        exported.save(path.as_ref())?;
        info!(
            path = %path.as_ref().display(),
            entries = exported.len(),
            "exported parameters"
        );
        Ok(exported)
    }
}
