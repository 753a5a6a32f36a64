/// A characteristic exposed by a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CharacteristicInfo {
    uuid: String,
    properties: Vec<String>,
}

impl CharacteristicInfo {
    /// Creates a characteristic description with lowercase property labels.
    #[must_use]
    pub fn new(uuid: impl Into<String>, properties: Vec<String>) -> Self {
        Self {
            uuid: uuid.into().to_ascii_lowercase(),
            properties,
        }
    }

    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns property labels such as `notify` or `read`.
    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Returns whether the characteristic can push values to the central.
    #[must_use]
    pub fn supports_notify(&self) -> bool {
        self.has_property("notify") || self.has_property("indicate")
    }

    fn has_property(&self, property: &str) -> bool {
        self.properties
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(property))
    }
}

/// A GATT service and its characteristics.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceInfo {
    uuid: String,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Creates a service description.
    #[must_use]
    pub fn new(uuid: impl Into<String>, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid: uuid.into().to_ascii_lowercase(),
            characteristics,
        }
    }

    /// Returns the service UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns the characteristics of this service.
    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }

    pub(crate) fn characteristic(&self, uuid: &str) -> Option<&CharacteristicInfo> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid().eq_ignore_ascii_case(uuid))
    }
}
