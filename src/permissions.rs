// permissions.rs - Permission names used by commands and module descriptors
// Mirrors the subset of Discord guild permissions the built-in modules care
// about, plus the synthetic `developer` flag that only the privileged user holds.

use serde::{Deserialize, Serialize};
use serenity::model::permissions::Permissions;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    Administrator,
    ManageGuild,
    ManageChannels,
    ManageMessages,
    ManageRoles,
    /// Synthetic: never granted by Discord, only implied by the developer identity
    Developer,
}

impl Permission {
    pub const ALL_GUILD: [Permission; 5] = [
        Permission::Administrator,
        Permission::ManageGuild,
        Permission::ManageChannels,
        Permission::ManageMessages,
        Permission::ManageRoles,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Permission::Administrator => "administrator",
            Permission::ManageGuild => "manageGuild",
            Permission::ManageChannels => "manageChannels",
            Permission::ManageMessages => "manageMessages",
            Permission::ManageRoles => "manageRoles",
            Permission::Developer => "developer",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL_GUILD
            .iter()
            .chain(std::iter::once(&Permission::Developer))
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown permission: {}", s))
    }
}

/// Ordered set of permissions, displayed as a comma separated list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every guild permission; what an administrator effectively holds
    pub fn all_guild() -> Self {
        Permission::ALL_GUILD.into_iter().collect()
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn insert(&mut self, permission: Permission) {
        self.0.insert(permission);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Permissions in `self` that `held` lacks
    pub fn missing_from(&self, held: &PermissionSet) -> PermissionSet {
        self.0.difference(&held.0).copied().collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        PermissionSet(iter.into_iter().collect())
    }
}

impl From<&[Permission]> for PermissionSet {
    fn from(permissions: &[Permission]) -> Self {
        permissions.iter().copied().collect()
    }
}

impl From<Permissions> for PermissionSet {
    fn from(perms: Permissions) -> Self {
        if perms.contains(Permissions::ADMINISTRATOR) {
            return PermissionSet::all_guild();
        }
        let mapping = [
            (Permissions::MANAGE_GUILD, Permission::ManageGuild),
            (Permissions::MANAGE_CHANNELS, Permission::ManageChannels),
            (Permissions::MANAGE_MESSAGES, Permission::ManageMessages),
            (Permissions::MANAGE_ROLES, Permission::ManageRoles),
        ];
        mapping
            .into_iter()
            .filter(|(flag, _)| perms.contains(*flag))
            .map(|(_, permission)| permission)
            .collect()
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("None");
        }
        let names: Vec<&str> = self.0.iter().map(Permission::name).collect();
        f.write_str(&names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_from_reports_only_unheld() {
        let required: PermissionSet = [Permission::ManageMessages, Permission::ManageRoles]
            .into_iter()
            .collect();
        let held: PermissionSet = [Permission::ManageMessages].into_iter().collect();
        let missing = required.missing_from(&held);
        assert_eq!(missing.len(), 1);
        assert!(missing.contains(Permission::ManageRoles));
    }

    #[test]
    fn test_administrator_implies_guild_permissions_but_not_developer() {
        let set = PermissionSet::from(Permissions::ADMINISTRATOR);
        assert!(set.contains(Permission::ManageGuild));
        assert!(set.contains(Permission::ManageRoles));
        assert!(!set.contains(Permission::Developer));
    }

    #[test]
    fn test_discord_flags_map_to_names() {
        let set = PermissionSet::from(Permissions::MANAGE_MESSAGES | Permissions::SEND_MESSAGES);
        assert_eq!(set.to_string(), "manageMessages");
        assert_eq!(PermissionSet::new().to_string(), "None");
    }

    #[test]
    fn test_parse_permission_names() {
        assert_eq!("manageguild".parse::<Permission>(), Ok(Permission::ManageGuild));
        assert_eq!("developer".parse::<Permission>(), Ok(Permission::Developer));
        assert!("banMembers".parse::<Permission>().is_err());
    }
}
