//! Macro for implementing Display and FromStr for string-backed enums
//!
//! Source kinds, write policies and change kinds are persisted and exchanged
//! as lowercase strings. This macro keeps the Display and FromStr sides of
//! that mapping in one place, with case-insensitive parsing.
//!
//! # Example
//!
//! ```rust
//! use homeboard_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Visibility {
//!     Public,
//!     Private,
//! }
//!
//! impl_domain_status_conversions!(Visibility {
//!     Public => "public",
//!     Private => "private",
//! });
//!
//! assert_eq!("PRIVATE".parse::<Visibility>().unwrap(), Visibility::Private);
//! ```

/// Implements Display and FromStr traits for string-backed enums
///
/// # Arguments
///
/// * `$enum_name` - The name of the enum type
/// * `$variant => $str` - Mapping of enum variants to their lowercase string
///   representations
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => ::std::result::Result::Ok(Self::$variant),)+
                    _ => ::std::result::Result::Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Shade {
        Light,
        Dark,
    }

    impl_domain_status_conversions!(Shade {
        Light => "light",
        Dark => "dark",
    });

    #[test]
    fn display_is_lowercase() {
        assert_eq!(Shade::Light.to_string(), "light");
        assert_eq!(Shade::Dark.to_string(), "dark");
    }

    #[test]
    fn parsing_ignores_case() {
        assert_eq!(Shade::from_str("DaRk").unwrap(), Shade::Dark);
        assert_eq!(Shade::from_str("light").unwrap(), Shade::Light);
    }

    #[test]
    fn unknown_values_are_rejected() {
        let err = Shade::from_str("dim").unwrap_err();
        assert!(err.contains("Invalid Shade: dim"));
        assert!(Shade::from_str("").is_err());
    }
}
