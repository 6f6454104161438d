//! GATT data model and characteristic role classification
//!
//! Classification runs in two explicit steps: every characteristic yields at
//! most one role candidate (INDICATE, then WRITE, then NOTIFY), and the
//! candidates are folded in discovery order so the last one per role wins.

use std::fmt;
use uuid::Uuid;

/// Characteristic properties byte (GATT "Characteristic Properties" field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharProperties(u8);

impl CharProperties {
    pub const READ: u8 = 0x02;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;

    /// Wrap a raw properties byte
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw properties byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn readable(self) -> bool {
        self.0 & Self::READ != 0
    }

    pub const fn writable(self) -> bool {
        self.0 & Self::WRITE != 0
    }

    pub const fn notifiable(self) -> bool {
        self.0 & Self::NOTIFY != 0
    }

    pub const fn indicatable(self) -> bool {
        self.0 & Self::INDICATE != 0
    }

    /// Names of the recognised flags, in bit order
    pub fn names(self) -> Vec<&'static str> {
        [
            (self.readable(), "READ"),
            (self.writable(), "WRITE"),
            (self.notifiable(), "NOTIFY"),
            (self.indicatable(), "INDICATE"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

impl fmt::Display for CharProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(", "))
    }
}

/// A descriptor attached to a characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorInfo {
    pub uuid: Uuid,
    pub handle: u16,
}

/// A discovered characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    /// Attribute handle used for direct value reads/writes
    pub handle: u16,
    pub properties: CharProperties,
    pub descriptors: Vec<DescriptorInfo>,
}

impl CharacteristicInfo {
    pub fn new(uuid: Uuid, handle: u16, properties: CharProperties) -> Self {
        Self {
            uuid,
            handle,
            properties,
            descriptors: Vec::new(),
        }
    }

    /// Attach a descriptor (builder style)
    pub fn with_descriptor(mut self, uuid: Uuid, handle: u16) -> Self {
        self.descriptors.push(DescriptorInfo { uuid, handle });
        self
    }

    /// Handle of the first descriptor with the given UUID
    pub fn descriptor_handle(&self, uuid: Uuid) -> Option<u16> {
        self.descriptors
            .iter()
            .find(|d| d.uuid == uuid)
            .map(|d| d.handle)
    }
}

/// A discovered primary service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// Semantic purpose assigned to a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Indicated button state
    Button,
    /// Writable LED value
    Led,
    /// Notified sensor value
    Sensor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Button => write!(f, "Button"),
            Role::Led => write!(f, "LED"),
            Role::Sensor => write!(f, "Sensor"),
        }
    }
}

/// Role a characteristic would take, by priority INDICATE > WRITE > NOTIFY
pub fn candidate_role(properties: CharProperties) -> Option<Role> {
    if properties.indicatable() {
        Some(Role::Button)
    } else if properties.writable() {
        Some(Role::Led)
    } else if properties.notifiable() {
        Some(Role::Sensor)
    } else {
        None
    }
}

/// Collect (role, characteristic) candidates in discovery order.
///
/// With a filter set, only services carrying that UUID are inspected.
pub fn candidates<'a>(
    services: &'a [ServiceInfo],
    filter: Option<Uuid>,
) -> Vec<(Role, &'a CharacteristicInfo)> {
    services
        .iter()
        .filter(|service| filter.map_or(true, |uuid| service.uuid == uuid))
        .flat_map(|service| service.characteristics.iter())
        .filter_map(|ch| candidate_role(ch.properties).map(|role| (role, ch)))
        .collect()
}

/// Characteristics selected for each role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMap {
    pub button: Option<CharacteristicInfo>,
    pub led: Option<CharacteristicInfo>,
    pub sensor: Option<CharacteristicInfo>,
}

impl RoleMap {
    /// Fold candidates in order; a later candidate replaces an earlier one
    pub fn assign<'a, I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = (Role, &'a CharacteristicInfo)>,
    {
        let mut map = Self::default();
        for (role, ch) in candidates {
            *map.slot_mut(role) = Some(ch.clone());
        }
        map
    }

    pub fn get(&self, role: Role) -> Option<&CharacteristicInfo> {
        match role {
            Role::Button => self.button.as_ref(),
            Role::Led => self.led.as_ref(),
            Role::Sensor => self.sensor.as_ref(),
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<CharacteristicInfo> {
        match role {
            Role::Button => &mut self.button,
            Role::Led => &mut self.led,
            Role::Sensor => &mut self.sensor,
        }
    }

    /// Role owning the given value handle, if any
    pub fn role_of(&self, handle: u16) -> Option<Role> {
        [Role::Button, Role::Led, Role::Sensor]
            .into_iter()
            .find(|&role| self.get(role).is_some_and(|ch| ch.handle == handle))
    }

    pub fn is_complete(&self) -> bool {
        self.button.is_some() && self.led.is_some() && self.sensor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(n: u128, handle: u16, bits: u8) -> CharacteristicInfo {
        CharacteristicInfo::new(Uuid::from_u128(n), handle, CharProperties::from_bits(bits))
    }

    fn service(n: u128, characteristics: Vec<CharacteristicInfo>) -> ServiceInfo {
        ServiceInfo {
            uuid: Uuid::from_u128(n),
            characteristics,
        }
    }

    #[test]
    fn test_property_names() {
        let props = CharProperties::from_bits(CharProperties::READ | CharProperties::NOTIFY);
        assert_eq!(props.names(), vec!["READ", "NOTIFY"]);
        assert_eq!(props.to_string(), "READ, NOTIFY");
        assert_eq!(CharProperties::default().to_string(), "");
    }

    #[test]
    fn test_unknown_bits_are_ignored() {
        // broadcast (0x01) and write-without-response (0x04) are not roles
        let props = CharProperties::from_bits(0x01 | 0x04);
        assert!(props.names().is_empty());
        assert_eq!(candidate_role(props), None);
    }

    #[test]
    fn test_candidate_priority() {
        let all = CharProperties::READ
            | CharProperties::WRITE
            | CharProperties::NOTIFY
            | CharProperties::INDICATE;
        assert_eq!(candidate_role(CharProperties::from_bits(all)), Some(Role::Button));
        assert_eq!(
            candidate_role(CharProperties::from_bits(CharProperties::WRITE | CharProperties::NOTIFY)),
            Some(Role::Led)
        );
        assert_eq!(
            candidate_role(CharProperties::from_bits(CharProperties::READ | CharProperties::NOTIFY)),
            Some(Role::Sensor)
        );
        assert_eq!(candidate_role(CharProperties::from_bits(CharProperties::READ)), None);
    }

    #[test]
    fn test_one_of_each_fills_every_role() {
        let services = vec![service(
            1,
            vec![
                ch(10, 0x0010, CharProperties::READ | CharProperties::INDICATE),
                ch(11, 0x0012, CharProperties::WRITE),
                ch(12, 0x0014, CharProperties::READ | CharProperties::NOTIFY),
            ],
        )];

        let roles = RoleMap::assign(candidates(&services, None));
        assert!(roles.is_complete());
        assert_eq!(roles.button.as_ref().map(|c| c.handle), Some(0x0010));
        assert_eq!(roles.led.as_ref().map(|c| c.handle), Some(0x0012));
        assert_eq!(roles.sensor.as_ref().map(|c| c.handle), Some(0x0014));
    }

    #[test]
    fn test_last_match_wins_across_services() {
        let services = vec![
            service(1, vec![ch(10, 0x0003, CharProperties::WRITE)]),
            service(2, vec![ch(20, 0x0010, CharProperties::WRITE)]),
        ];

        let roles = RoleMap::assign(candidates(&services, None));
        assert_eq!(roles.led.as_ref().map(|c| c.handle), Some(0x0010));
        assert!(roles.button.is_none());
        assert!(roles.sensor.is_none());
    }

    #[test]
    fn test_service_filter() {
        let services = vec![
            service(1, vec![ch(10, 0x0003, CharProperties::NOTIFY)]),
            service(2, vec![ch(20, 0x0010, CharProperties::WRITE)]),
        ];

        let found = candidates(&services, Some(Uuid::from_u128(1)));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, Role::Sensor);

        let none = candidates(&services, Some(Uuid::from_u128(99)));
        assert!(none.is_empty());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let services = vec![service(
            1,
            vec![
                ch(1, 1, CharProperties::NOTIFY),
                ch(2, 2, CharProperties::WRITE | CharProperties::NOTIFY),
                ch(3, 3, CharProperties::NOTIFY),
            ],
        )];
        let first = RoleMap::assign(candidates(&services, None));
        let second = RoleMap::assign(candidates(&services, None));
        assert_eq!(first, second);
        assert_eq!(first.sensor.as_ref().map(|c| c.handle), Some(3));
        assert_eq!(first.led.as_ref().map(|c| c.handle), Some(2));
    }

    #[test]
    fn test_role_of_and_descriptor_lookup() {
        let sensor = ch(1, 0x0020, CharProperties::NOTIFY)
            .with_descriptor(Uuid::from_u128(0x2902), 0x0022);
        assert_eq!(sensor.descriptor_handle(Uuid::from_u128(0x2902)), Some(0x0022));
        assert_eq!(sensor.descriptor_handle(Uuid::from_u128(0x2901)), None);

        let roles = RoleMap {
            sensor: Some(sensor),
            ..Default::default()
        };
        assert_eq!(roles.role_of(0x0020), Some(Role::Sensor));
        assert_eq!(roles.role_of(0x0021), None);
    }
}
