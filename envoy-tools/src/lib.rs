//! Tool-call surface shared between the orchestrator and the reasoning
//! engine: the closed registry, request/result envelopes, and the error
//! taxonomy reported back on failures.

mod error;
mod registry;
mod types;

pub use error::{ErrorKind, Result, ToolError};
pub use registry::{
    AskUserParams, AssignRoleParams, AutoConfigurePermissionsParams, BulkCreateRolesParams,
    ChildChannelSpec, CloneChannelPermissionsParams, CreateCategoryParams, CreateChannelParams,
    CreateRoleParams, DeleteCategoryParams, DeleteChannelParams, DeleteRoleParams,
    EditCategoryParams, EditChannelParams, EditRoleParams, GetDesignSectionParams,
    MakeChannelPrivateParams, MarkCompleteParams, MoveChannelParams, RemoveRoleParams,
    RoleOverwriteSpec, SetCategoryPermissionsParams, SetPermissionsParams, SetPlanParams,
    ToolInvocation, ToolName, UpdateTaskParams,
};
pub use types::{OperationRequest, OperationResult, ResultStatus, TaskId, TaskStatus, TurnId};
