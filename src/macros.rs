/// Declares an enum of wire literals together with its parse error type.
///
/// Generates the enum, `ALL`, `as_str()`, `Display`, a case-insensitive
/// `FromStr`, and the named error struct, whose message reads
/// `unknown <what>: <input>`.
///
/// ```ignore
/// define_wire_enum! {
///     /// Doc comment for the enum.
///     pub enum Direction: ParseDirectionError("direction") {
///         In => "in",
///         Out => "out",
///     }
/// }
/// ```
macro_rules! define_wire_enum {
    (
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident: $Err:ident($what:literal) {
            $(
                $(#[$var_meta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant,
            )+
        }

        impl $Name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$Name] = &[$($Name::$variant),+];

            /// Value as written on the wire.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($Name::$variant => $wire,)+
                }
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| {
                        v.as_str()
                            .eq_ignore_ascii_case(s)
                    })
                    .ok_or_else(|| $Err(s.to_string()))
            }
        }

        #[doc = concat!("Error returned when parsing an unrecognized ", $what, ".")]
        #[derive(Debug, Clone, PartialEq, Eq)]
        $vis struct $Err(pub String);

        impl std::fmt::Display for $Err {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!("unknown ", $what, ": {}"), self.0)
            }
        }

        impl std::error::Error for $Err {}
    };
}
