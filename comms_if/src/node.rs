//! # Convoy Node Identities

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Identity of a node in the convoy network.
///
/// Wire messages carry the sender's `NodeId` so receivers can tell commands
/// issued by the control center apart from vehicle telemetry.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NodeId {
    /// The lead vehicle
    Lv,

    /// The first follower vehicle
    Fv1,

    /// The second follower vehicle
    Fv2,

    /// The control center
    Cc,
}

/// Role of a vehicle within the platoon, fixed at startup.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
pub enum VehicleRole {
    Lv,
    Fv1,
    Fv2,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NodeId {
    /// Return true if this node is one of the vehicles rather than the
    /// control center.
    pub fn is_vehicle(&self) -> bool {
        !matches!(self, NodeId::Cc)
    }
}

impl VehicleRole {
    /// The network identity corresponding to this role.
    pub fn node_id(self) -> NodeId {
        match self {
            VehicleRole::Lv => NodeId::Lv,
            VehicleRole::Fv1 => NodeId::Fv1,
            VehicleRole::Fv2 => NodeId::Fv2,
        }
    }

    /// Return true if this vehicle leads the platoon.
    pub fn is_leader(self) -> bool {
        matches!(self, VehicleRole::Lv)
    }

    /// The vehicle immediately behind this one, which consumes this
    /// vehicle's rear-camera view, or `None` for the tail of the platoon.
    pub fn relay_successor(self) -> Option<NodeId> {
        match self {
            VehicleRole::Lv => Some(NodeId::Fv1),
            VehicleRole::Fv1 => Some(NodeId::Fv2),
            VehicleRole::Fv2 => None,
        }
    }

    /// Return true if this vehicle can stream its rear camera to the
    /// vehicle behind it.
    pub fn sends_rear_image(self) -> bool {
        self.relay_successor().is_some()
    }

    /// Return true if this vehicle can consume the rear-camera view of the
    /// vehicle ahead of it.
    pub fn consumes_rear_image(self) -> bool {
        !self.is_leader()
    }
}

impl std::fmt::Display for VehicleRole {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            VehicleRole::Lv => write!(f, "LV"),
            VehicleRole::Fv1 => write!(f, "FV1"),
            VehicleRole::Fv2 => write!(f, "FV2"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_relay_chain() {
        assert_eq!(VehicleRole::Lv.relay_successor(), Some(NodeId::Fv1));
        assert_eq!(VehicleRole::Fv1.relay_successor(), Some(NodeId::Fv2));
        assert_eq!(VehicleRole::Fv2.relay_successor(), None);

        assert!(VehicleRole::Lv.sends_rear_image());
        assert!(!VehicleRole::Lv.consumes_rear_image());
        assert!(VehicleRole::Fv1.sends_rear_image());
        assert!(VehicleRole::Fv1.consumes_rear_image());
        assert!(!VehicleRole::Fv2.sends_rear_image());
        assert!(VehicleRole::Fv2.consumes_rear_image());
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&VehicleRole::Fv1).unwrap();
        let role: VehicleRole = serde_json::from_str(&json).unwrap();
        assert_eq!(role, VehicleRole::Fv1);
        assert_eq!(role.node_id(), NodeId::Fv1);
    }
}
