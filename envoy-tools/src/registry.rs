//! Closed tool registry.
//!
//! Every operation the reasoning engine may invoke is one variant of
//! [`ToolInvocation`], carrying its own typed argument struct. Unknown names
//! and malformed arguments fail here, before any permission check or remote
//! call.

use crate::error::{Result, ToolError};
use crate::types::{OperationRequest, TaskId, TaskStatus};
use envoy_discord::{ChannelKind, Permissions};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    GetServerInfo,
    CreateChannel,
    EditChannel,
    DeleteChannel,
    MoveChannel,
    CreateCategory,
    EditCategory,
    DeleteCategory,
    CreateRole,
    BulkCreateRoles,
    EditRole,
    DeleteRole,
    AssignRole,
    RemoveRole,
    SetPermissions,
    SetCategoryPermissions,
    MakeChannelPrivate,
    CloneChannelPermissions,
    AutoConfigurePermissions,
    SetPlan,
    UpdateTask,
    AskUser,
    MarkComplete,
    ListDesignSections,
    GetDesignSection,
}

impl ToolName {
    pub const ALL: [ToolName; 25] = [
        ToolName::GetServerInfo,
        ToolName::CreateChannel,
        ToolName::EditChannel,
        ToolName::DeleteChannel,
        ToolName::MoveChannel,
        ToolName::CreateCategory,
        ToolName::EditCategory,
        ToolName::DeleteCategory,
        ToolName::CreateRole,
        ToolName::BulkCreateRoles,
        ToolName::EditRole,
        ToolName::DeleteRole,
        ToolName::AssignRole,
        ToolName::RemoveRole,
        ToolName::SetPermissions,
        ToolName::SetCategoryPermissions,
        ToolName::MakeChannelPrivate,
        ToolName::CloneChannelPermissions,
        ToolName::AutoConfigurePermissions,
        ToolName::SetPlan,
        ToolName::UpdateTask,
        ToolName::AskUser,
        ToolName::MarkComplete,
        ToolName::ListDesignSections,
        ToolName::GetDesignSection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::GetServerInfo => "get_server_info",
            ToolName::CreateChannel => "create_channel",
            ToolName::EditChannel => "edit_channel",
            ToolName::DeleteChannel => "delete_channel",
            ToolName::MoveChannel => "move_channel",
            ToolName::CreateCategory => "create_category",
            ToolName::EditCategory => "edit_category",
            ToolName::DeleteCategory => "delete_category",
            ToolName::CreateRole => "create_role",
            ToolName::BulkCreateRoles => "bulk_create_roles",
            ToolName::EditRole => "edit_role",
            ToolName::DeleteRole => "delete_role",
            ToolName::AssignRole => "assign_role",
            ToolName::RemoveRole => "remove_role",
            ToolName::SetPermissions => "set_permissions",
            ToolName::SetCategoryPermissions => "set_category_permissions",
            ToolName::MakeChannelPrivate => "make_channel_private",
            ToolName::CloneChannelPermissions => "clone_channel_permissions",
            ToolName::AutoConfigurePermissions => "auto_configure_permissions",
            ToolName::SetPlan => "set_plan",
            ToolName::UpdateTask => "update_task",
            ToolName::AskUser => "ask_user",
            ToolName::MarkComplete => "mark_complete",
            ToolName::ListDesignSections => "list_design_sections",
            ToolName::GetDesignSection => "get_design_section",
        }
    }

    pub fn parse(name: &str) -> Option<ToolName> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_channel_kind() -> ChannelKind {
    ChannelKind::Text
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelParams {
    pub name: String,
    #[serde(default = "default_channel_kind")]
    pub channel_type: ChannelKind,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditChannelParams {
    pub channel_name: String,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub slowmode_seconds: Option<u64>,
    #[serde(default)]
    pub nsfw: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteChannelParams {
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoveChannelParams {
    pub channel_name: String,
    pub category_name: String,
    #[serde(default)]
    pub sync_permissions: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChildChannelSpec {
    pub name: String,
    #[serde(default = "default_channel_kind")]
    pub channel_type: ChannelKind,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCategoryParams {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<ChildChannelSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditCategoryParams {
    pub name: String,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteCategoryParams {
    pub name: String,
    /// Also delete every channel inside the category.
    #[serde(default)]
    pub delete_channels: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoleParams {
    pub name: String,
    /// Hex color string, with or without leading '#'.
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub mentionable: bool,
    /// Permission names from the documented Discord set.
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkCreateRolesParams {
    /// Role specs created in order, one remote call each.
    pub roles: Vec<CreateRoleParams>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditRoleParams {
    pub name: String,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub hoist: Option<bool>,
    #[serde(default)]
    pub mentionable: Option<bool>,
    /// When present, replaces the role's permission set.
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteRoleParams {
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignRoleParams {
    pub role_name: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveRoleParams {
    pub role_name: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPermissionsParams {
    pub channel_name: String,
    /// Role the overwrite applies to.
    pub target_name: String,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RoleOverwriteSpec {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetCategoryPermissionsParams {
    pub category_name: String,
    /// Role name -> overwrite spec.
    pub role_permissions: BTreeMap<String, RoleOverwriteSpec>,
    #[serde(default = "default_true")]
    pub sync_to_channels: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MakeChannelPrivateParams {
    pub channel_name: String,
    /// Roles that keep access once the channel is locked down.
    pub allowed_roles: Vec<String>,
    #[serde(default = "default_true")]
    pub deny_everyone: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloneChannelPermissionsParams {
    pub source_channel: String,
    pub target_channel: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoConfigurePermissionsParams {
    /// One of: professional, community, private, gaming.
    pub template: String,
    #[serde(default)]
    pub staff_roles: Vec<String>,
    #[serde(default)]
    pub member_role: Option<String>,
    #[serde(default)]
    pub info_categories: Vec<String>,
    #[serde(default)]
    pub staff_categories: Vec<String>,
    #[serde(default)]
    pub announcement_channels: Vec<String>,
}

fn default_plan_title() -> String {
    "Server Configuration".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPlanParams {
    #[serde(default = "default_plan_title")]
    pub plan_title: String,
    /// Task descriptions in execution order.
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTaskParams {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AskUserParams {
    pub question: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkCompleteParams {
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetDesignSectionParams {
    pub section: String,
}

/// A parsed, type-checked tool call. One variant per registry entry; new
/// tools extend the enum and every `match` below is checked exhaustively.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    GetServerInfo,
    CreateChannel(CreateChannelParams),
    EditChannel(EditChannelParams),
    DeleteChannel(DeleteChannelParams),
    MoveChannel(MoveChannelParams),
    CreateCategory(CreateCategoryParams),
    EditCategory(EditCategoryParams),
    DeleteCategory(DeleteCategoryParams),
    CreateRole(CreateRoleParams),
    BulkCreateRoles(BulkCreateRolesParams),
    EditRole(EditRoleParams),
    DeleteRole(DeleteRoleParams),
    AssignRole(AssignRoleParams),
    RemoveRole(RemoveRoleParams),
    SetPermissions(SetPermissionsParams),
    SetCategoryPermissions(SetCategoryPermissionsParams),
    MakeChannelPrivate(MakeChannelPrivateParams),
    CloneChannelPermissions(CloneChannelPermissionsParams),
    AutoConfigurePermissions(AutoConfigurePermissionsParams),
    SetPlan(SetPlanParams),
    UpdateTask(UpdateTaskParams),
    AskUser(AskUserParams),
    MarkComplete(MarkCompleteParams),
    ListDesignSections,
    GetDesignSection(GetDesignSectionParams),
}

fn decode<T: serde::de::DeserializeOwned>(tool: ToolName, args: &serde_json::Value) -> Result<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| ToolError::InvalidArguments(format!("{tool}: {e}")))
}

fn require_empty(tool: ToolName, args: &serde_json::Value) -> Result<()> {
    match args {
        serde_json::Value::Null => Ok(()),
        serde_json::Value::Object(map) if map.is_empty() => Ok(()),
        other => Err(ToolError::InvalidArguments(format!(
            "{tool} takes no arguments, got {other}"
        ))),
    }
}

impl ToolInvocation {
    pub fn parse(request: &OperationRequest) -> Result<Self> {
        let Some(tool) = ToolName::parse(&request.tool_name) else {
            return Err(ToolError::UnknownTool(request.tool_name.clone()));
        };
        let args = &request.arguments;
        let invocation = match tool {
            ToolName::GetServerInfo => {
                require_empty(tool, args)?;
                ToolInvocation::GetServerInfo
            }
            ToolName::CreateChannel => ToolInvocation::CreateChannel(decode(tool, args)?),
            ToolName::EditChannel => ToolInvocation::EditChannel(decode(tool, args)?),
            ToolName::DeleteChannel => ToolInvocation::DeleteChannel(decode(tool, args)?),
            ToolName::MoveChannel => ToolInvocation::MoveChannel(decode(tool, args)?),
            ToolName::CreateCategory => ToolInvocation::CreateCategory(decode(tool, args)?),
            ToolName::EditCategory => ToolInvocation::EditCategory(decode(tool, args)?),
            ToolName::DeleteCategory => ToolInvocation::DeleteCategory(decode(tool, args)?),
            ToolName::CreateRole => ToolInvocation::CreateRole(decode(tool, args)?),
            ToolName::BulkCreateRoles => ToolInvocation::BulkCreateRoles(decode(tool, args)?),
            ToolName::EditRole => ToolInvocation::EditRole(decode(tool, args)?),
            ToolName::DeleteRole => ToolInvocation::DeleteRole(decode(tool, args)?),
            ToolName::AssignRole => ToolInvocation::AssignRole(decode(tool, args)?),
            ToolName::RemoveRole => ToolInvocation::RemoveRole(decode(tool, args)?),
            ToolName::SetPermissions => ToolInvocation::SetPermissions(decode(tool, args)?),
            ToolName::SetCategoryPermissions => {
                ToolInvocation::SetCategoryPermissions(decode(tool, args)?)
            }
            ToolName::MakeChannelPrivate => {
                ToolInvocation::MakeChannelPrivate(decode(tool, args)?)
            }
            ToolName::CloneChannelPermissions => {
                ToolInvocation::CloneChannelPermissions(decode(tool, args)?)
            }
            ToolName::AutoConfigurePermissions => {
                ToolInvocation::AutoConfigurePermissions(decode(tool, args)?)
            }
            ToolName::SetPlan => ToolInvocation::SetPlan(decode(tool, args)?),
            ToolName::UpdateTask => ToolInvocation::UpdateTask(decode(tool, args)?),
            ToolName::AskUser => ToolInvocation::AskUser(decode(tool, args)?),
            ToolName::MarkComplete => ToolInvocation::MarkComplete(decode(tool, args)?),
            ToolName::ListDesignSections => {
                require_empty(tool, args)?;
                ToolInvocation::ListDesignSections
            }
            ToolName::GetDesignSection => ToolInvocation::GetDesignSection(decode(tool, args)?),
        };
        Ok(invocation)
    }

    pub fn tool_name(&self) -> ToolName {
        match self {
            ToolInvocation::GetServerInfo => ToolName::GetServerInfo,
            ToolInvocation::CreateChannel(_) => ToolName::CreateChannel,
            ToolInvocation::EditChannel(_) => ToolName::EditChannel,
            ToolInvocation::DeleteChannel(_) => ToolName::DeleteChannel,
            ToolInvocation::MoveChannel(_) => ToolName::MoveChannel,
            ToolInvocation::CreateCategory(_) => ToolName::CreateCategory,
            ToolInvocation::EditCategory(_) => ToolName::EditCategory,
            ToolInvocation::DeleteCategory(_) => ToolName::DeleteCategory,
            ToolInvocation::CreateRole(_) => ToolName::CreateRole,
            ToolInvocation::BulkCreateRoles(_) => ToolName::BulkCreateRoles,
            ToolInvocation::EditRole(_) => ToolName::EditRole,
            ToolInvocation::DeleteRole(_) => ToolName::DeleteRole,
            ToolInvocation::AssignRole(_) => ToolName::AssignRole,
            ToolInvocation::RemoveRole(_) => ToolName::RemoveRole,
            ToolInvocation::SetPermissions(_) => ToolName::SetPermissions,
            ToolInvocation::SetCategoryPermissions(_) => ToolName::SetCategoryPermissions,
            ToolInvocation::MakeChannelPrivate(_) => ToolName::MakeChannelPrivate,
            ToolInvocation::CloneChannelPermissions(_) => ToolName::CloneChannelPermissions,
            ToolInvocation::AutoConfigurePermissions(_) => ToolName::AutoConfigurePermissions,
            ToolInvocation::SetPlan(_) => ToolName::SetPlan,
            ToolInvocation::UpdateTask(_) => ToolName::UpdateTask,
            ToolInvocation::AskUser(_) => ToolName::AskUser,
            ToolInvocation::MarkComplete(_) => ToolName::MarkComplete,
            ToolInvocation::ListDesignSections => ToolName::ListDesignSections,
            ToolInvocation::GetDesignSection(_) => ToolName::GetDesignSection,
        }
    }

    /// True when the operation changes remote workspace state. Mutating
    /// operations are held behind the confirmation gate and the guard.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ToolInvocation::CreateChannel(_)
                | ToolInvocation::EditChannel(_)
                | ToolInvocation::DeleteChannel(_)
                | ToolInvocation::MoveChannel(_)
                | ToolInvocation::CreateCategory(_)
                | ToolInvocation::EditCategory(_)
                | ToolInvocation::DeleteCategory(_)
                | ToolInvocation::CreateRole(_)
                | ToolInvocation::EditRole(_)
                | ToolInvocation::DeleteRole(_)
                | ToolInvocation::AssignRole(_)
                | ToolInvocation::RemoveRole(_)
                | ToolInvocation::BulkCreateRoles(_)
                | ToolInvocation::SetPermissions(_)
                | ToolInvocation::SetCategoryPermissions(_)
                | ToolInvocation::MakeChannelPrivate(_)
                | ToolInvocation::CloneChannelPermissions(_)
                | ToolInvocation::AutoConfigurePermissions(_)
        )
    }

    /// Operations whose legality depends on the role hierarchy; the
    /// snapshot is refreshed before validating these.
    pub fn is_role_affecting(&self) -> bool {
        matches!(
            self,
            ToolInvocation::EditRole(_)
                | ToolInvocation::DeleteRole(_)
                | ToolInvocation::AssignRole(_)
                | ToolInvocation::RemoveRole(_)
        )
    }

    /// Specific permission bits the bot must hold for the operation.
    pub fn required_permissions(&self) -> Permissions {
        match self {
            ToolInvocation::CreateChannel(_)
            | ToolInvocation::EditChannel(_)
            | ToolInvocation::DeleteChannel(_)
            | ToolInvocation::MoveChannel(_)
            | ToolInvocation::CreateCategory(_)
            | ToolInvocation::EditCategory(_)
            | ToolInvocation::DeleteCategory(_) => Permissions::MANAGE_CHANNELS,
            ToolInvocation::CreateRole(_)
            | ToolInvocation::BulkCreateRoles(_)
            | ToolInvocation::EditRole(_)
            | ToolInvocation::DeleteRole(_)
            | ToolInvocation::AssignRole(_)
            | ToolInvocation::RemoveRole(_) => Permissions::MANAGE_ROLES,
            ToolInvocation::SetPermissions(_) | ToolInvocation::SetCategoryPermissions(_) => {
                Permissions::MANAGE_ROLES
            }
            ToolInvocation::MakeChannelPrivate(_)
            | ToolInvocation::CloneChannelPermissions(_)
            | ToolInvocation::AutoConfigurePermissions(_) => {
                Permissions::MANAGE_CHANNELS.union(Permissions::MANAGE_ROLES)
            }
            ToolInvocation::GetServerInfo
            | ToolInvocation::SetPlan(_)
            | ToolInvocation::UpdateTask(_)
            | ToolInvocation::AskUser(_)
            | ToolInvocation::MarkComplete(_)
            | ToolInvocation::ListDesignSections
            | ToolInvocation::GetDesignSection(_) => Permissions::empty(),
        }
    }
}
