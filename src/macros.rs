/// Generates a non-exhaustive enum of AMI field names.
///
/// Produces: enum definition + `ALL` + `as_str()` + `Display` + `AsRef<str>` +
/// case-insensitive `FromStr`. The error type must be defined separately, as a
/// tuple struct holding the rejected input (see `ParseManagerHeaderError`).
///
/// ```ignore
/// define_field_enum! {
///     error_type: ParseMyFieldError,
///     /// Doc comment for the enum.
///     pub enum MyField {
///         ActionId => "ActionID",
///         Event => "Event",
///     }
/// }
/// ```
macro_rules! define_field_enum {
    (
        error_type: $Err:ident,
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident {
            $(
                $(#[$var_meta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant,
            )+
        }

        impl $Name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$Name] = &[$( $Name::$variant, )+];

            /// Field name as sent on the wire.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $Name::$variant => $wire, )+
                }
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| s.eq_ignore_ascii_case(v.as_str()))
                    .ok_or_else(|| $Err(s.to_string()))
            }
        }
    };
}
