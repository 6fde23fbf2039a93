//! Access control aggregation
//!
//! Models Windows-style access control entries (ACEs) as they come back
//! from a file share, and combines the file-level and share-level lists
//! into the single [`Acl`] recorded in snapshots and fed downstream.
//!
//! Any deny entry that survives filtering makes the result
//! [`Acl::indeterminate`]: the consumer must then perform its own access
//! check. There is no partial result.

use crate::config::{PrincipalFormat, SecurityPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Aggregated access list for one file or directory
///
/// If `is_public` is set every other field is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    users: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    groups: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deny_users: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deny_groups: Option<BTreeSet<String>>,
    #[serde(default)]
    is_public: bool,
}

impl Acl {
    /// Readable by anyone
    pub fn public() -> Self {
        Self {
            is_public: true,
            ..Self::default()
        }
    }

    /// Security could not be determined
    pub fn indeterminate() -> Self {
        Self::default()
    }

    /// Allow lists only
    pub fn allow(users: BTreeSet<String>, groups: BTreeSet<String>) -> Self {
        Self {
            users: Some(users),
            groups: Some(groups),
            ..Self::default()
        }
    }

    /// Allow and deny lists
    pub fn with_denies(
        users: BTreeSet<String>,
        groups: BTreeSet<String>,
        deny_users: BTreeSet<String>,
        deny_groups: BTreeSet<String>,
    ) -> Self {
        Self {
            users: Some(users),
            groups: Some(groups),
            deny_users: Some(deny_users),
            deny_groups: Some(deny_groups),
            is_public: false,
        }
    }

    /// Allowed users
    pub fn users(&self) -> Option<&BTreeSet<String>> {
        self.users.as_ref()
    }

    /// Allowed groups
    pub fn groups(&self) -> Option<&BTreeSet<String>> {
        self.groups.as_ref()
    }

    /// Denied users
    pub fn deny_users(&self) -> Option<&BTreeSet<String>> {
        self.deny_users.as_ref()
    }

    /// Denied groups
    pub fn deny_groups(&self) -> Option<&BTreeSet<String>> {
        self.deny_groups.as_ref()
    }

    /// Readable by anyone
    pub fn is_public(&self) -> bool {
        self.is_public
    }

    /// False for the indeterminate value
    pub fn is_determinate(&self) -> bool {
        self.is_public || self.users.is_some() || self.groups.is_some()
    }
}

/// ACE type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AceType {
    /// Allow access
    AccessAllowed,
    /// Deny access
    AccessDenied,
    /// Audit access
    SystemAudit,
    /// Alarm access
    SystemAlarm,
    /// Object-specific allow
    AccessAllowedObject,
    /// Object-specific deny
    AccessDeniedObject,
}

impl AceType {
    /// Allow entries of either flavour
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::AccessAllowed | Self::AccessAllowedObject)
    }

    /// Deny entries of either flavour
    pub fn is_deny(&self) -> bool {
        matches!(self, Self::AccessDenied | Self::AccessDeniedObject)
    }
}

/// ACE flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AceFlags {
    /// Inherit to child objects
    pub object_inherit: bool,
    /// Inherit to child containers
    pub container_inherit: bool,
    /// Inherit only (not applied to this object)
    pub inherit_only: bool,
    /// Inherited from parent
    pub inherited: bool,
}

/// Access rights mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMask {
    /// Raw access mask value
    pub value: u32,
}

impl AccessMask {
    // Standard rights
    pub const DELETE: u32 = 0x00010000;
    pub const READ_CONTROL: u32 = 0x00020000;
    pub const SYNCHRONIZE: u32 = 0x00100000;

    // Generic rights
    pub const GENERIC_READ: u32 = 0x80000000;
    pub const GENERIC_WRITE: u32 = 0x40000000;
    pub const GENERIC_EXECUTE: u32 = 0x20000000;
    pub const GENERIC_ALL: u32 = 0x10000000;

    // File-specific rights
    pub const FILE_READ_DATA: u32 = 0x00000001;
    pub const FILE_WRITE_DATA: u32 = 0x00000002;
    pub const FILE_READ_EA: u32 = 0x00000008;
    pub const FILE_EXECUTE: u32 = 0x00000020;
    pub const FILE_READ_ATTRIBUTES: u32 = 0x00000080;

    /// Full control
    pub const FULL_CONTROL: u32 = 0x001F01FF;

    /// Rights a reader needs by default
    pub const DEFAULT_READ: u32 = Self::FILE_READ_DATA;

    /// Create new access mask
    pub fn new(value: u32) -> Self {
        Self { value }
    }

    /// Check if specific right is set
    pub fn has(&self, right: u32) -> bool {
        self.value & right == right
    }

    /// Check whether this mask grants everything in `read_mask`
    pub fn grants_read(&self, read_mask: u32) -> bool {
        self.has(read_mask) || self.has(Self::GENERIC_READ) || self.has(Self::GENERIC_ALL)
    }
}

/// Kind of account a SID names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SidType {
    /// User account
    User,
    /// Domain group
    Group,
    /// Local or builtin group
    Alias,
    /// Well-known group such as Everyone
    WellKnownGroup,
    /// Account was deleted
    DeletedAccount,
    /// Machine account
    Computer,
    /// Could not be resolved
    Unknown,
}

/// A resolved security principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Account name
    pub name: String,
    /// Domain, if any
    pub domain: Option<String>,
    /// SID string
    pub sid: String,
    /// Account kind
    pub sid_type: SidType,
}

impl Principal {
    /// Create a principal
    pub fn new(
        name: impl Into<String>,
        domain: Option<&str>,
        sid: impl Into<String>,
        sid_type: SidType,
    ) -> Self {
        Self {
            name: name.into(),
            domain: domain.map(str::to_string),
            sid: sid.into(),
            sid_type,
        }
    }

    /// The Everyone group
    pub fn everyone() -> Self {
        Self::new("Everyone", None, well_known_sids::EVERYONE, SidType::WellKnownGroup)
    }

    /// Render the name according to `format`
    pub fn format(&self, format: PrincipalFormat) -> String {
        match (&self.domain, format) {
            (Some(domain), PrincipalFormat::NameAtDomain) => format!("{}@{}", self.name, domain),
            (Some(domain), PrincipalFormat::DomainBackslashName) => {
                format!("{}\\{}", domain, self.name)
            }
            _ => self.name.clone(),
        }
    }

    fn is_user(&self) -> bool {
        self.sid_type == SidType::User
    }

    fn is_everyone(&self) -> bool {
        self.sid == well_known_sids::EVERYONE
    }
}

/// One access control entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    /// Entry type
    pub ace_type: AceType,
    /// Entry flags
    pub flags: AceFlags,
    /// Access mask
    pub access_mask: AccessMask,
    /// Trustee
    pub principal: Principal,
}

impl Ace {
    /// Plain allow entry with the given rights
    pub fn allow(principal: Principal, rights: u32) -> Self {
        Self {
            ace_type: AceType::AccessAllowed,
            flags: AceFlags::default(),
            access_mask: AccessMask::new(rights),
            principal,
        }
    }

    /// Plain deny entry with the given rights
    pub fn deny(principal: Principal, rights: u32) -> Self {
        Self {
            ace_type: AceType::AccessDenied,
            flags: AceFlags::default(),
            access_mask: AccessMask::new(rights),
            principal,
        }
    }
}

/// Well-known SID strings
pub mod well_known_sids {
    /// Everyone
    pub const EVERYONE: &str = "S-1-1-0";
    /// Administrators
    pub const ADMINISTRATORS: &str = "S-1-5-32-544";
    /// Users
    pub const USERS: &str = "S-1-5-32-545";
    /// Authenticated Users
    pub const AUTHENTICATED_USERS: &str = "S-1-5-11";
    /// Local System
    pub const LOCAL_SYSTEM: &str = "S-1-5-18";
    /// Creator Owner
    pub const CREATOR_OWNER: &str = "S-1-3-0";
    /// Creator Group
    pub const CREATOR_GROUP: &str = "S-1-3-1";

    /// Well-known groups that are meaningful to a downstream access check
    pub const SUPPORTED_GROUPS: &[&str] = &[EVERYONE, AUTHENTICATED_USERS, USERS];
}

/// Allowed principals of one level, split by kind
#[derive(Debug, Default)]
struct LevelPrincipals {
    users: BTreeSet<String>,
    groups: BTreeSet<String>,
    has_everyone: bool,
}

/// Combines file and share ACEs into one [`Acl`]
#[derive(Debug, Clone)]
pub struct AclAggregator {
    policy: SecurityPolicy,
    user_format: PrincipalFormat,
    group_format: PrincipalFormat,
    read_mask: u32,
    skip_inherited: bool,
}

impl AclAggregator {
    /// Create an aggregator for a policy with default formatting
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            policy,
            user_format: PrincipalFormat::default(),
            group_format: PrincipalFormat::default(),
            read_mask: AccessMask::DEFAULT_READ,
            skip_inherited: true,
        }
    }

    /// Set principal name formats
    pub fn with_formats(mut self, user_format: PrincipalFormat, group_format: PrincipalFormat) -> Self {
        self.user_format = user_format;
        self.group_format = group_format;
        self
    }

    /// Set the rights an entry must grant to count
    pub fn with_read_mask(mut self, read_mask: u32) -> Self {
        self.read_mask = read_mask;
        self
    }

    /// Keep inherited entries instead of dropping them
    pub fn keep_inherited(mut self) -> Self {
        self.skip_inherited = false;
        self
    }

    /// Configured policy
    pub fn policy(&self) -> SecurityPolicy {
        self.policy
    }

    /// Aggregate file-level and share-level ACEs
    pub fn aggregate(&self, file_aces: &[Ace], share_aces: &[Ace]) -> Acl {
        let file = self.filter(file_aces);
        let share = self.filter(share_aces);

        let consulted_deny = (self.policy.uses_file() && file.iter().any(|a| a.ace_type.is_deny()))
            || (self.policy.uses_share() && share.iter().any(|a| a.ace_type.is_deny()));
        if consulted_deny {
            tracing::debug!("Deny ACE present, ACL is indeterminate");
            return Acl::indeterminate();
        }

        let file = self.collect(&file);
        let share = self.collect(&share);

        match self.policy {
            SecurityPolicy::File => Acl::allow(file.users, file.groups),
            SecurityPolicy::Share => Acl::allow(share.users, share.groups),
            SecurityPolicy::FileOrShare => Acl::allow(
                file.users.union(&share.users).cloned().collect(),
                file.groups.union(&share.groups).cloned().collect(),
            ),
            SecurityPolicy::FileAndShare => {
                // Everyone on one side admits every entry of the other side;
                // actual group membership is not resolved.
                let users = intersect(&file.users, &share.users, file.has_everyone, share.has_everyone);
                let groups = intersect(&file.groups, &share.groups, file.has_everyone, share.has_everyone);
                Acl::allow(users, groups)
            }
        }
    }

    /// Drop entries that do not bear on read access
    fn filter<'a>(&self, aces: &'a [Ace]) -> Vec<&'a Ace> {
        aces.iter()
            .filter(|ace| ace.ace_type.is_allow() || ace.ace_type.is_deny())
            .filter(|ace| !ace.flags.inherit_only)
            .filter(|ace| !(self.skip_inherited && ace.flags.inherited))
            .filter(|ace| ace.access_mask.grants_read(self.read_mask))
            .filter(|ace| is_supported(&ace.principal))
            .collect()
    }

    fn collect(&self, aces: &[&Ace]) -> LevelPrincipals {
        let mut level = LevelPrincipals::default();
        for ace in aces {
            let principal = &ace.principal;
            if principal.is_everyone() {
                level.has_everyone = true;
            }
            if principal.is_user() {
                level.users.insert(principal.format(self.user_format));
            } else {
                level.groups.insert(principal.format(self.group_format));
            }
        }
        level
    }
}

fn is_supported(principal: &Principal) -> bool {
    match principal.sid_type {
        SidType::User | SidType::Group | SidType::Alias => true,
        SidType::WellKnownGroup => well_known_sids::SUPPORTED_GROUPS.contains(&principal.sid.as_str()),
        SidType::DeletedAccount | SidType::Computer | SidType::Unknown => false,
    }
}

fn intersect(
    file: &BTreeSet<String>,
    share: &BTreeSet<String>,
    file_everyone: bool,
    share_everyone: bool,
) -> BTreeSet<String> {
    let from_file = file.iter().filter(|p| share_everyone || share.contains(*p));
    let from_share = share.iter().filter(|p| file_everyone || file.contains(*p));
    from_file.chain(from_share).cloned().collect()
}
