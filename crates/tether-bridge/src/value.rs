//! String forms of bridged values

use tether_core::WireValue;

/// A value with a flat-map string representation
pub trait FlatValue: WireValue {
    fn to_flat(&self) -> String;

    fn from_flat(s: &str) -> Option<Self>;
}

impl FlatValue for bool {
    /// Always lowercase
    fn to_flat(&self) -> String {
        if *self { "true" } else { "false" }.to_string()
    }

    fn from_flat(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("true") {
            Some(true)
        } else if s.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            None
        }
    }
}

macro_rules! flat_number {
    ($($t:ty),*) => {
        $(
            impl FlatValue for $t {
                fn to_flat(&self) -> String {
                    self.to_string()
                }

                fn from_flat(s: &str) -> Option<Self> {
                    s.trim().parse().ok()
                }
            }
        )*
    };
}

flat_number!(i32, u32, i64, u64);

impl FlatValue for String {
    fn to_flat(&self) -> String {
        self.clone()
    }

    fn from_flat(s: &str) -> Option<Self> {
        Some(s.to_string())
    }
}

/// Whether a trigger key was set to true
pub fn is_truthy(s: &str) -> bool {
    bool::from_flat(s) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_forms() {
        assert_eq!(true.to_flat(), "true");
        assert_eq!(false.to_flat(), "false");
        assert_eq!(bool::from_flat("True"), Some(true));
        assert_eq!(bool::from_flat(" FALSE "), Some(false));
        assert_eq!(bool::from_flat("1"), None);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(i32::from_flat("-12"), Some(-12));
        assert_eq!(u32::from_flat("-1"), None);
        assert_eq!(42i64.to_flat(), "42");
    }

    #[test]
    fn test_truthy() {
        assert!(is_truthy("TRUE"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
    }
}
