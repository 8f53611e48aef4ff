//! Logical ends of the bridge and their pairing table
//!
//! A node always serves one role and talks to a fixed counterpart role.
//! "Control" roles are one-directional: they hold a client handle to the
//! named end but never start a server of their own.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The fixed set of logical roles a node can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The neuronal simulator end
    Neuron,
    /// The 3D visualization end
    Blender,
    /// One-directional controller that drives the NEURON end
    ControlNeuron,
    /// One-directional controller that drives the Blender end
    ControlBlender,
}

impl Role {
    /// All recognized roles
    pub fn all() -> &'static [Role] {
        &[
            Role::Neuron,
            Role::Blender,
            Role::ControlNeuron,
            Role::ControlBlender,
        ]
    }

    /// The counterpart this role connects to as a client
    pub fn counterpart(&self) -> Role {
        match self {
            Role::Neuron => Role::Blender,
            Role::Blender => Role::Neuron,
            Role::ControlNeuron => Role::Neuron,
            Role::ControlBlender => Role::Blender,
        }
    }

    /// Control roles have a client but no server of their own
    pub fn is_control(&self) -> bool {
        matches!(self, Role::ControlNeuron | Role::ControlBlender)
    }

    /// The serving end this role reads configuration for. Control roles
    /// never serve, so only their counterpart's settings matter.
    pub fn base_end(&self) -> Role {
        match self {
            Role::ControlNeuron => Role::Neuron,
            Role::ControlBlender => Role::Blender,
            other => *other,
        }
    }

    /// Canonical name, used in address file names and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Neuron => "NEURON",
            Role::Blender => "Blender",
            Role::ControlNeuron => "Control-NEURON",
            Role::ControlBlender => "Control-Blender",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEURON" => Ok(Role::Neuron),
            "Blender" => Ok(Role::Blender),
            "Control-NEURON" => Ok(Role::ControlNeuron),
            "Control-Blender" => Ok(Role::ControlBlender),
            other => Err(Error::UnknownRole {
                role: other.to_string(),
                expected: Role::all()
                    .iter()
                    .map(|r| r.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}
