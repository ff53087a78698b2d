//! Carrier and command type enums

use serde::{Deserialize, Serialize};

/// Mobile carrier a SIM (and a command) is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Carrier {
    Inwi,
    Orange,
    Iam,
}

impl Carrier {
    /// All carriers, in declaration order
    pub const ALL: [Carrier; 3] = [Carrier::Inwi, Carrier::Orange, Carrier::Iam];
}

impl std::fmt::Display for Carrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inwi => write!(f, "INWI"),
            Self::Orange => write!(f, "ORANGE"),
            Self::Iam => write!(f, "IAM"),
        }
    }
}

impl std::str::FromStr for Carrier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INWI" => Ok(Self::Inwi),
            "ORANGE" => Ok(Self::Orange),
            "IAM" => Ok(Self::Iam),
            _ => Err(format!("Unknown carrier: {}", s)),
        }
    }
}

/// Kind of USSD command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandType {
    /// Service or bundle activation
    Activation,
    /// Balance check
    Check,
    /// Airtime top-up
    Topup,
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activation => write!(f, "ACTIVATION"),
            Self::Check => write!(f, "CHECK"),
            Self::Topup => write!(f, "TOPUP"),
        }
    }
}

impl std::str::FromStr for CommandType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVATION" => Ok(Self::Activation),
            "CHECK" | "BALANCE" | "BALANCE-CHECK" => Ok(Self::Check),
            "TOPUP" | "TOP-UP" => Ok(Self::Topup),
            _ => Err(format!("Unknown command type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carrier_display_matches_serde() {
        for carrier in Carrier::ALL {
            let json = serde_json::to_string(&carrier).unwrap();
            assert_eq!(json, format!("\"{}\"", carrier));
        }
    }

    #[test]
    fn test_carrier_from_str_is_case_insensitive() {
        assert_eq!("inwi".parse::<Carrier>().unwrap(), Carrier::Inwi);
        assert_eq!("Orange".parse::<Carrier>().unwrap(), Carrier::Orange);
        assert!("vodafone".parse::<Carrier>().is_err());
    }

    #[test]
    fn test_command_type_aliases() {
        assert_eq!("balance-check".parse::<CommandType>().unwrap(), CommandType::Check);
        assert_eq!("top-up".parse::<CommandType>().unwrap(), CommandType::Topup);
        assert_eq!("activation".parse::<CommandType>().unwrap(), CommandType::Activation);
    }
}
