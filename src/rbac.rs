// Role-based visibility checks for the back-office panel

use std::fmt;
use std::str::FromStr;

/// Back-office roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Super,
    Content,
    Ops,
    DealerManager,
    Compliance,
    Analyst,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Super,
        Role::Content,
        Role::Ops,
        Role::DealerManager,
        Role::Compliance,
        Role::Analyst,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Super => "super",
            Role::Content => "content",
            Role::Ops => "ops",
            Role::DealerManager => "dealer_manager",
            Role::Compliance => "compliance",
            Role::Analyst => "analyst",
        }
    }

    /// Permissions granted to this role; `*` grants everything
    pub fn permissions(&self) -> &'static [&'static str] {
        match self {
            Role::Super => &["*"],
            Role::Content => &["cms.read", "cms.write", "seo.write", "i18n.write"],
            Role::Ops => &["lead.read", "lead.write", "proto.read", "proto.write"],
            Role::DealerManager => &["dealer.read", "dealer.write", "training.write", "cert.write"],
            Role::Compliance => &["nda.write", "audit.read"],
            Role::Analyst => &["reports.read"],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Whether `role` grants `permission`
pub fn can(role: Role, permission: &str) -> bool {
    let granted = role.permissions();
    granted.contains(&"*") || granted.contains(&permission)
}
