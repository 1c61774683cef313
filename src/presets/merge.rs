//! Conflict-safe merging of preset fields into existing lists.
//!
//! Every merge builds an index of the base list by identity key, then walks
//! the presets in order. Unknown keys are appended (first writer wins the
//! slot); known keys must be structurally equal to the indexed item or a
//! conflict is recorded. All conflicts of a pass are collected before
//! returning so one log line explains everything that is wrong.
//!
//! The functions never touch their inputs: calling them twice with the same
//! arguments returns the same result.

use std::collections::HashMap;
use std::fmt;

use k8s_openapi::api::core::v1::{EnvFromSource, EnvVar, Volume, VolumeMount};
use kube::ResourceExt;

use crate::crd::{PodPreset, PodPresetSpec};

/// The preset field a conflict was found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Env,
    Volumes,
    VolumeMounts,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Env => write!(f, "env"),
            Field::Volumes => write!(f, "volumes"),
            Field::VolumeMounts => write!(f, "volume mounts"),
        }
    }
}

/// Identity axis on which two items collided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    Name,
    MountPath,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Name => Ok(()),
            Axis::MountPath => write!(f, "mount path "),
        }
    }
}

/// Two items share an identity key but differ in content.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("merging {field} for {preset} has a conflict on {axis}{key}: {incoming} does not match {existing}")]
pub struct Conflict {
    pub field: Field,
    pub axis: Axis,
    /// Name of the preset whose item was rejected.
    pub preset: String,
    /// Value of the identity key on the failing axis.
    pub key: String,
    pub incoming: String,
    pub existing: String,
}

/// Every conflict found in one merge pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conflicts(Vec<Conflict>);

impl Conflicts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, conflict: Conflict) {
        self.0.push(conflict);
    }

    pub fn extend(&mut self, other: Conflicts) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conflict> {
        self.0.iter()
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), Conflicts> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for Conflicts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, conflict) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{conflict}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Conflicts {}

/// An item merged by a single `name` key.
pub trait Keyed: Clone + PartialEq + fmt::Debug {
    const FIELD: Field;

    fn key(&self) -> &str;

    /// The items of this kind carried by a preset.
    fn from_spec(spec: &PodPresetSpec) -> &[Self];
}

impl Keyed for EnvVar {
    const FIELD: Field = Field::Env;

    fn key(&self) -> &str {
        &self.name
    }

    fn from_spec(spec: &PodPresetSpec) -> &[Self] {
        &spec.env
    }
}

impl Keyed for Volume {
    const FIELD: Field = Field::Volumes;

    fn key(&self) -> &str {
        &self.name
    }

    fn from_spec(spec: &PodPresetSpec) -> &[Self] {
        &spec.volumes
    }
}

fn conflict<T: fmt::Debug>(
    field: Field,
    axis: Axis,
    preset: &PodPreset,
    key: &str,
    incoming: &T,
    existing: &T,
) -> Conflict {
    Conflict {
        field,
        axis,
        preset: preset.name_any(),
        key: key.to_string(),
        incoming: format!("{incoming:?}"),
        existing: format!("{existing:?}"),
    }
}

/// Merge the items of kind `T` from `presets` into `base`.
pub fn merge_keyed<T: Keyed>(base: &[T], presets: &[&PodPreset]) -> Result<Vec<T>, Conflicts> {
    let mut index: HashMap<&str, &T> = base.iter().map(|item| (item.key(), item)).collect();
    let mut merged = base.to_vec();
    let mut conflicts = Conflicts::new();

    for preset in presets {
        for item in T::from_spec(&preset.spec) {
            match index.get(item.key()) {
                None => {
                    index.insert(item.key(), item);
                    merged.push(item.clone());
                }
                Some(found) if *found != item => {
                    conflicts.push(conflict(T::FIELD, Axis::Name, preset, item.key(), item, *found));
                }
                Some(_) => {}
            }
        }
    }

    conflicts.into_result().map(|()| merged)
}

/// Merge preset env vars into a container's env.
pub fn merge_env(base: &[EnvVar], presets: &[&PodPreset]) -> Result<Vec<EnvVar>, Conflicts> {
    merge_keyed(base, presets)
}

/// Merge preset volumes into a Pod's volumes.
pub fn merge_volumes(base: &[Volume], presets: &[&PodPreset]) -> Result<Vec<Volume>, Conflicts> {
    merge_keyed(base, presets)
}

/// Merge preset volume mounts into a container's mounts.
///
/// Mounts are unique by `name` and by `mountPath`; both axes are checked
/// on every incoming mount and each failing axis yields its own conflict.
pub fn merge_volume_mounts(
    base: &[VolumeMount],
    presets: &[&PodPreset],
) -> Result<Vec<VolumeMount>, Conflicts> {
    let mut by_name: HashMap<&str, &VolumeMount> =
        base.iter().map(|m| (m.name.as_str(), m)).collect();
    let mut by_path: HashMap<&str, &VolumeMount> =
        base.iter().map(|m| (m.mount_path.as_str(), m)).collect();
    let mut merged = base.to_vec();
    let mut conflicts = Conflicts::new();

    for preset in presets {
        for mount in &preset.spec.volume_mounts {
            match by_name.get(mount.name.as_str()) {
                None => {
                    by_name.insert(&mount.name, mount);
                    merged.push(mount.clone());
                }
                Some(found) if *found != mount => conflicts.push(conflict(
                    Field::VolumeMounts,
                    Axis::Name,
                    preset,
                    &mount.name,
                    mount,
                    *found,
                )),
                Some(_) => {}
            }

            match by_path.get(mount.mount_path.as_str()) {
                None => {
                    by_path.insert(&mount.mount_path, mount);
                }
                Some(found) if *found != mount => conflicts.push(conflict(
                    Field::VolumeMounts,
                    Axis::MountPath,
                    preset,
                    &mount.mount_path,
                    mount,
                    *found,
                )),
                Some(_) => {}
            }
        }
    }

    conflicts.into_result().map(|()| merged)
}

/// Append preset env sources after the container's own. Never conflicts.
pub fn merge_env_from(base: &[EnvFromSource], presets: &[&PodPreset]) -> Vec<EnvFromSource> {
    base.iter()
        .chain(presets.iter().flat_map(|p| p.spec.env_from.iter()))
        .cloned()
        .collect()
}
