/// Declares a closed vocabulary: an enum plus a bijective `parse`/`as_str`
/// pair over its canonical spellings.
///
/// The generated `parse` accepts exactly the listed spellings; everything
/// else is `None`. `FromStr` wraps the same table and reports the
/// vocabulary name on failure.
macro_rules! closed_vocab {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumIter)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Parses the canonical spelling. Unknown words yield `None`.
            $vis fn parse(s: &str) -> Option<Self> {
                match s {
                    $( $text => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// The canonical spelling of this word.
            $vis const fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $text, )+
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl core::str::FromStr for $name {
            type Err = crate::UnknownWord;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s).ok_or_else(|| crate::UnknownWord {
                    word: s.to_owned(),
                    vocab: stringify!($name),
                })
            }
        }
    };
}
