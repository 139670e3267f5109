use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// What a content node represents. The numeric codes are stable and part of the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ContentKind {
    Undefined = -1,
    Storage = 0,
    Directory = 1,
    File = 2,
    DeviceRoot = 3,
}

impl ContentKind {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Undefined),
            0 => Some(Self::Storage),
            1 => Some(Self::Directory),
            2 => Some(Self::File),
            3 => Some(Self::DeviceRoot),
            _ => None,
        }
    }

    /// Storages, directories, and the device root can have children.
    pub fn is_container(self) -> bool {
        matches!(self, Self::Storage | Self::Directory | Self::DeviceRoot)
    }

    /// Containers that accept new files and directories.
    pub(crate) fn accepts_content(self) -> bool {
        matches!(self, Self::Storage | Self::Directory)
    }
}

impl Serialize for ContentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for ContentKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        Self::from_code(code).ok_or_else(|| serde::de::Error::custom(format!("unknown content kind code {code}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ContentKind::Undefined.code(), -1);
        assert_eq!(ContentKind::Storage.code(), 0);
        assert_eq!(ContentKind::Directory.code(), 1);
        assert_eq!(ContentKind::File.code(), 2);
        assert_eq!(ContentKind::DeviceRoot.code(), 3);
    }

    #[test]
    fn test_from_code() {
        for kind in [
            ContentKind::Undefined,
            ContentKind::Storage,
            ContentKind::Directory,
            ContentKind::File,
            ContentKind::DeviceRoot,
        ] {
            assert_eq!(ContentKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ContentKind::from_code(4), None);
    }

    #[test]
    fn test_serializes_as_code() {
        assert_eq!(serde_json::to_string(&ContentKind::File).unwrap(), "2");
        assert_eq!(serde_json::from_str::<ContentKind>("-1").unwrap(), ContentKind::Undefined);
        assert!(serde_json::from_str::<ContentKind>("9").is_err());
    }

    #[test]
    fn test_containers() {
        assert!(ContentKind::Storage.is_container());
        assert!(ContentKind::DeviceRoot.is_container());
        assert!(!ContentKind::File.is_container());
        assert!(!ContentKind::Undefined.is_container());
        assert!(!ContentKind::DeviceRoot.accepts_content());
    }
}
