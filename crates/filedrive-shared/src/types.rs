use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access tier on a file or folder. Totally ordered: viewer < editor < owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Viewer,
    Editor,
    Owner,
}

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Owner => "owner",
        }
    }

    /// A grant at this level authorizes any operation requiring `required` or less.
    pub fn allows(&self, required: PermissionLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPermissionLevel(pub String);

impl fmt::Display for UnknownPermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown permission level: {}", self.0)
    }
}

impl std::error::Error for UnknownPermissionLevel {}

impl FromStr for PermissionLevel {
    type Err = UnknownPermissionLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Self::Viewer),
            "editor" => Ok(Self::Editor),
            "owner" => Ok(Self::Owner),
            other => Err(UnknownPermissionLevel(other.to_string())),
        }
    }
}

/// Target of a permission check or grant: exactly one file or one folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ResourceRef {
    Folder(Uuid),
    File(Uuid),
}

impl ResourceRef {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Folder(id) | Self::File(id) => *id,
        }
    }

    pub fn folder_id(&self) -> Option<Uuid> {
        match self {
            Self::Folder(id) => Some(*id),
            Self::File(_) => None,
        }
    }

    pub fn file_id(&self) -> Option<Uuid> {
        match self {
            Self::File(id) => Some(*id),
            Self::Folder(_) => None,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Folder(id) => write!(f, "folder:{id}"),
            Self::File(id) => write!(f, "file:{id}"),
        }
    }
}

/// Identity extracted from a verified access credential, handed to request handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(PermissionLevel::Viewer < PermissionLevel::Editor);
        assert!(PermissionLevel::Editor < PermissionLevel::Owner);
        assert!(PermissionLevel::Owner.allows(PermissionLevel::Viewer));
        assert!(PermissionLevel::Editor.allows(PermissionLevel::Editor));
        assert!(!PermissionLevel::Viewer.allows(PermissionLevel::Editor));
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("editor".parse::<PermissionLevel>(), Ok(PermissionLevel::Editor));
        assert!("admin".parse::<PermissionLevel>().is_err());
    }

    #[test]
    fn test_resource_ref_json_shape() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(ResourceRef::Folder(id)).unwrap();
        assert_eq!(json["type"], "folder");
        assert_eq!(json["id"], id.to_string());
    }
}
