//! Identifiers, bindings and the three pool kinds.

use super::expand::{expand_asn_range, expand_ip_pairs, expand_ipv4_range};
use super::PoolError;
use std::fmt::Debug;
use std::net::Ipv4Addr;

pub type FabricId = u32;
pub type DeviceId = u32;
pub type InterfaceId = u32;

/// Owner of a single IP address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpBinding {
    pub device_id: DeviceId,
    pub interface_id: InterfaceId,
}

impl IpBinding {
    pub fn new(device_id: DeviceId, interface_id: InterfaceId) -> Self {
        Self { device_id, interface_id }
    }
}

/// Owner of an address pair: the two ends of a point-to-point link.
///
/// `device_one`/`interface_one` receive the first address of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairBinding {
    pub device_one: DeviceId,
    pub interface_one: InterfaceId,
    pub device_two: DeviceId,
    pub interface_two: InterfaceId,
}

impl PairBinding {
    pub fn new(
        device_one: DeviceId,
        device_two: DeviceId,
        interface_one: InterfaceId,
        interface_two: InterfaceId,
    ) -> Self {
        Self { device_one, interface_one, device_two, interface_two }
    }

    /// Same link seen from the other end
    pub fn reversed(&self) -> Self {
        Self {
            device_one: self.device_two,
            interface_one: self.interface_two,
            device_two: self.device_one,
            interface_two: self.interface_one,
        }
    }
}

/// Behaviour that differs between the ASN, IP and IP-pair pools.
///
/// Units are stored in `Available` in their pooled form and in `Used` in the
/// orientation of the canonical binding.
pub trait PoolKind: Send + Sync + 'static {
    /// Label used in error messages ("ASN", "IP")
    const LABEL: &'static str;
    /// What the category names for this pool ("Role", "type")
    const CATEGORY_NOUN: &'static str;
    /// Whether a reservation may replace the unit a binding already holds
    const REPLACE_HELD: bool;

    type Unit: Clone + Ord + Debug + Send + Sync + 'static;
    type Binding: Clone + Ord + Debug + Send + Sync + 'static;

    /// Expand a textual range into units, in allocation order
    fn expand(range: &str, allow_small: bool) -> Result<Vec<Self::Unit>, String>;

    /// Canonical binding and whether the caller's orientation is reversed
    fn canonical(binding: &Self::Binding) -> (Self::Binding, bool) {
        (binding.clone(), false)
    }

    /// Swap the orientation of a unit
    fn flip(unit: Self::Unit) -> Self::Unit {
        unit
    }

    /// Form a unit takes in the `Available` table
    fn pooled(unit: &Self::Unit) -> Self::Unit {
        unit.clone()
    }

    /// Error for reserving a unit that is neither available nor held by the
    /// binding. `None` means such reservations are accepted.
    fn reservation_error(
        _fabric_id: FabricId,
        _binding: &Self::Binding,
        _unit: &Self::Unit,
    ) -> Option<PoolError> {
        None
    }

    fn describe(binding: &Self::Binding) -> String;
}

/// Autonomous system numbers, categorized by device role
#[derive(Debug)]
pub struct AsnKind;

impl PoolKind for AsnKind {
    const LABEL: &'static str = "ASN";
    const CATEGORY_NOUN: &'static str = "Role";
    const REPLACE_HELD: bool = false;

    type Unit = u32;
    type Binding = DeviceId;

    fn expand(range: &str, _allow_small: bool) -> Result<Vec<u32>, String> {
        expand_asn_range(range)
    }

    fn describe(binding: &DeviceId) -> String {
        format!("Device {}", binding)
    }
}

/// Single addresses, categorized by address type ("Loopback", "VTEPLoopback")
#[derive(Debug)]
pub struct IpKind;

impl PoolKind for IpKind {
    const LABEL: &'static str = "IP";
    const CATEGORY_NOUN: &'static str = "type";
    const REPLACE_HELD: bool = false;

    type Unit = Ipv4Addr;
    type Binding = IpBinding;

    fn expand(range: &str, allow_small: bool) -> Result<Vec<Ipv4Addr>, String> {
        expand_ipv4_range(range, allow_small)
    }

    fn describe(binding: &IpBinding) -> String {
        format!("Device {} Interface {}", binding.device_id, binding.interface_id)
    }
}

/// Address pairs for point-to-point links
#[derive(Debug)]
pub struct IpPairKind;

impl PoolKind for IpPairKind {
    const LABEL: &'static str = "IP";
    const CATEGORY_NOUN: &'static str = "type";
    const REPLACE_HELD: bool = true;

    type Unit = (Ipv4Addr, Ipv4Addr);
    type Binding = PairBinding;

    fn expand(range: &str, allow_small: bool) -> Result<Vec<(Ipv4Addr, Ipv4Addr)>, String> {
        expand_ip_pairs(range, allow_small)
    }

    fn canonical(binding: &PairBinding) -> (PairBinding, bool) {
        let one = (binding.device_one, binding.interface_one);
        let two = (binding.device_two, binding.interface_two);
        if one <= two {
            (*binding, false)
        } else {
            (binding.reversed(), true)
        }
    }

    fn flip(unit: (Ipv4Addr, Ipv4Addr)) -> (Ipv4Addr, Ipv4Addr) {
        (unit.1, unit.0)
    }

    fn pooled(unit: &(Ipv4Addr, Ipv4Addr)) -> (Ipv4Addr, Ipv4Addr) {
        if unit.0 <= unit.1 {
            *unit
        } else {
            (unit.1, unit.0)
        }
    }

    fn reservation_error(
        fabric_id: FabricId,
        binding: &PairBinding,
        unit: &(Ipv4Addr, Ipv4Addr),
    ) -> Option<PoolError> {
        Some(PoolError::ReservationMismatch(format!(
            "IPPair({},{}) not present in the Used IP Table for Fabric {} Device ({},{})",
            unit.0, unit.1, fabric_id, binding.device_one, binding.device_two
        )))
    }

    fn describe(binding: &PairBinding) -> String {
        format!(
            "Device ({},{}) Interface ({},{})",
            binding.device_one, binding.device_two, binding.interface_one, binding.interface_two
        )
    }
}
