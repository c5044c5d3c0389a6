use refbatch_core::{ObjectId, RefName, UpdateError, UpdateResult};
use refbatch_storage::RefUpdate;

use crate::context::RepoContext;
use crate::op::RepoOnlyOp;

/// Creates a ref that must not exist yet
///
/// Register with [`BatchUpdate::add_repo_only_op`](crate::BatchUpdate::add_repo_only_op).
#[derive(Debug, Clone)]
pub struct CreateRefOp {
    name: RefName,
    target: ObjectId,
}

impl CreateRefOp {
    /// Create `name` pointing at `target`
    pub fn new(name: RefName, target: ObjectId) -> Self {
        Self { name, target }
    }

    /// Name of the created ref
    pub fn name(&self) -> &RefName {
        &self.name
    }

    /// Object the ref points at
    pub fn target(&self) -> ObjectId {
        self.target
    }
}

impl RepoOnlyOp for CreateRefOp {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> UpdateResult<()> {
        if self.target.is_zero() {
            return Err(UpdateError::bad_request("ref target must not be the zero id"));
        }
        if ctx.read_ref(&self.name)?.is_some() {
            return Err(UpdateError::conflict(format!("ref {} already exists", self.name)));
        }
        ctx.add_ref_update(RefUpdate::create(self.name.clone(), self.target))
    }
}
