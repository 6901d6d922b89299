use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Exhausted, Result, RunnerError};
use crate::scheduler::resource::ResourceDir;

/// Decides whether a directory can take one more job.
pub type Admission = Arc<dyn Fn(&ResourceDir) -> bool + Send + Sync>;

/// The default admission rule: room for a full reservation on top of what
/// is already reserved.
pub fn room_for_one_more() -> Admission {
    Arc::new(|dir: &ResourceDir| dir.has_room())
}

#[derive(Debug, Default)]
struct Rotation {
    members: Vec<Arc<ResourceDir>>,
    cursor: usize,
}

impl Rotation {
    fn advance(&mut self) -> &Arc<ResourceDir> {
        self.cursor = (self.cursor + 1) % self.members.len();
        &self.members[self.cursor]
    }
}

/// Ordered set of directories handed out round-robin.
///
/// The cursor survives between calls, so each search starts one past the
/// last directory examined.
pub struct ResourcePool {
    name: String,
    rotation: RwLock<Rotation>,
    admission: Admission,
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rotation = self.rotation.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ResourcePool")
            .field("name", &self.name)
            .field("members", &rotation.members)
            .field("cursor", &rotation.cursor)
            .finish()
    }
}

impl ResourcePool {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_admission(name, room_for_one_more())
    }

    pub fn with_admission(name: impl Into<String>, admission: Admission) -> Self {
        Self {
            name: name.into(),
            rotation: RwLock::new(Rotation::default()),
            admission,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append directories in rotation order. Duplicates are kept.
    pub fn add_members(&self, dirs: impl IntoIterator<Item = Arc<ResourceDir>>) {
        let mut rotation = self.rotation.write().unwrap_or_else(PoisonError::into_inner);
        rotation.members.extend(dirs);
    }

    pub fn count(&self) -> usize {
        self.rotation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .len()
    }

    pub fn members(&self) -> Vec<Arc<ResourceDir>> {
        self.rotation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .clone()
    }

    /// Next directory that passes this pool's admission rule.
    pub fn next_usable(&self) -> Result<Arc<ResourceDir>> {
        let admission = Arc::clone(&self.admission);
        self.next_usable_with(|dir| admission(dir))
    }

    /// Next directory that passes `admit`, examining each member at most
    /// once. The pool stays locked for the whole scan so concurrent callers
    /// rotate one after another.
    pub fn next_usable_with<F>(&self, admit: F) -> Result<Arc<ResourceDir>>
    where
        F: Fn(&ResourceDir) -> bool,
    {
        let mut rotation = self.rotation.write().unwrap_or_else(PoisonError::into_inner);
        if rotation.members.is_empty() {
            return Err(RunnerError::PoolMisconfigured(self.name.clone()));
        }

        for _ in 0..rotation.members.len() {
            let candidate = rotation.advance();
            if admit(candidate) {
                return Ok(Arc::clone(candidate));
            }
            tracing::debug!(
                pool = %self.name,
                path = %candidate.path().display(),
                "Directory not admissible, skipping"
            );
        }

        Err(RunnerError::AdmissionExhausted(Exhausted::NoAdmissibleDir {
            pool: self.name.clone(),
        }))
    }
}
