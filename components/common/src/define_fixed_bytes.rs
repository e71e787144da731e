/// Error returned when parsing a fixed size byte type from a hex string
/// or from a slice of the wrong length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedBytesError {
    InvalidLength,
    InvalidHexDigit,
}

impl ::std::fmt::Display for FixedBytesError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        match self {
            FixedBytesError::InvalidLength => write!(f, "invalid length"),
            FixedBytesError::InvalidHexDigit => write!(f, "invalid hex digit"),
        }
    }
}

/// Decode a hex string (optionally prefixed by `0x`) into `out`.
/// The string must describe exactly `out.len()` bytes.
pub fn decode_hex_into(src: &str, out: &mut [u8]) -> Result<(), FixedBytesError> {
    let digits = src
        .strip_prefix("0x")
        .or_else(|| src.strip_prefix("0X"))
        .unwrap_or(src)
        .as_bytes();

    if digits.len() != out.len() * 2 {
        return Err(FixedBytesError::InvalidLength);
    }

    for (i, pair) in digits.chunks(2).enumerate() {
        let high = hex_value(pair[0]).ok_or(FixedBytesError::InvalidHexDigit)?;
        let low = hex_value(pair[1]).ok_or(FixedBytesError::InvalidHexDigit)?;
        out[i] = (high << 4) | low;
    }
    Ok(())
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

/// Lower case hex encoding, without prefix.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join("")
}

/// Define a fixed size byte array type.
///
/// The generated type is `Copy`, ordered and hashable. It is shown as `0x` prefixed hex
/// and serialized as the same hex string, which keeps configuration files readable.
#[macro_export]
macro_rules! define_fixed_bytes {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            #[allow(unused)]
            #[inline]
            pub fn as_array_ref(&self) -> &[u8; $len] {
                &self.0
            }

            pub const fn len() -> usize {
                $len
            }

            #[allow(unused)]
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|byte| *byte == 0)
            }
        }

        impl AsRef<[u8]> for $name {
            #[inline]
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl ::std::ops::Deref for $name {
            type Target = [u8];
            #[inline]
            fn deref(&self) -> &[u8] {
                &self.0
            }
        }

        impl<'a> ::std::convert::From<&'a [u8; $len]> for $name {
            #[inline]
            fn from(src: &'a [u8; $len]) -> $name {
                $name(*src)
            }
        }

        impl<'a> ::std::convert::TryFrom<&'a [u8]> for $name {
            type Error = $crate::define_fixed_bytes::FixedBytesError;

            #[inline]
            fn try_from(src: &'a [u8]) -> Result<$name, Self::Error> {
                if src.len() != $len {
                    return Err($crate::define_fixed_bytes::FixedBytesError::InvalidLength);
                }
                let mut inner = [0x00u8; $len];
                inner.copy_from_slice(src);
                Ok($name(inner))
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::define_fixed_bytes::FixedBytesError;

            fn from_str(src: &str) -> Result<$name, Self::Err> {
                let mut inner = [0x00u8; $len];
                $crate::define_fixed_bytes::decode_hex_into(src, &mut inner)?;
                Ok($name(inner))
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "0x{}", $crate::define_fixed_bytes::encode_hex(&self.0))
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(self, f)
            }
        }

        impl ::std::default::Default for $name {
            fn default() -> Self {
                $name([0u8; $len])
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: ::serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<$name, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                let hex_str = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                hex_str
                    .parse()
                    .map_err(|_| ::serde::de::Error::custom("invalid hex bytes"))
            }
        }
    };
}
