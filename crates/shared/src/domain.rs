use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(WellId);
id_newtype!(StageId);

/// Progress label given to stages created without one.
pub const DEFAULT_STAGE_PROGRESS: &str = "In progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WellKind {
    Onshore,
    Offshore,
}

impl WellKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WellKind::Onshore => "onshore",
            WellKind::Offshore => "offshore",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "onshore" => Some(WellKind::Onshore),
            "offshore" => Some(WellKind::Offshore),
            _ => None,
        }
    }
}
