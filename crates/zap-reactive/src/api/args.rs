use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::HostError;

/// Dynamically typed value carried by the event bus.
pub type Variant = serde_json::Value;

/// A typed signal payload: zero to three values encoded as bus variants.
pub trait SignalArgs: Sized + 'static {
    /// Number of payload values.
    const ARITY: usize;

    /// Encode into bus variants.
    fn to_variants(&self) -> Result<Vec<Variant>, HostError>;

    /// Decode from bus variants. `None` on arity or type mismatch.
    fn from_variants(args: &[Variant]) -> Option<Self>;
}

impl SignalArgs for () {
    const ARITY: usize = 0;

    fn to_variants(&self) -> Result<Vec<Variant>, HostError> {
        Ok(Vec::new())
    }

    fn from_variants(args: &[Variant]) -> Option<Self> {
        args.is_empty().then_some(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Variant, HostError> {
    serde_json::to_value(value).map_err(|e| HostError::InvalidArguments(e.to_string()))
}

fn decode<T: DeserializeOwned>(value: &Variant) -> Option<T> {
    T::deserialize(value).ok()
}

macro_rules! impl_signal_args {
    ($arity:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name),+> SignalArgs for ($($name,)+)
        where
            $($name: Serialize + DeserializeOwned + 'static),+
        {
            const ARITY: usize = $arity;

            fn to_variants(&self) -> Result<Vec<Variant>, HostError> {
                Ok(vec![$(encode(&self.$idx)?),+])
            }

            fn from_variants(args: &[Variant]) -> Option<Self> {
                if args.len() != Self::ARITY {
                    return None;
                }
                Some(($(decode::<$name>(&args[$idx])?,)+))
            }
        }
    };
}

impl_signal_args!(1; A: 0);
impl_signal_args!(2; A: 0, B: 1);
impl_signal_args!(3; A: 0, B: 1, C: 2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_args_reject_payload() {
        assert_eq!(<()>::from_variants(&[]), Some(()));
        assert_eq!(<()>::from_variants(&[Variant::from(1)]), None);
    }

    #[test]
    fn triple_args_decode() {
        let raw = ("coin".to_string(), 3_i64, 0.5_f64).to_variants().unwrap();
        assert_eq!(raw.len(), 3);
        let decoded = <(String, i64, f64)>::from_variants(&raw).unwrap();
        assert_eq!(decoded, ("coin".to_string(), 3, 0.5));
    }

    #[test]
    fn type_mismatch_is_none() {
        let raw = vec![Variant::from("not a number")];
        assert_eq!(<(i32,)>::from_variants(&raw), None);
    }

    #[test]
    fn arity_mismatch_is_none() {
        let raw = vec![Variant::from(1), Variant::from(2)];
        assert_eq!(<(i32,)>::from_variants(&raw), None);
    }
}
