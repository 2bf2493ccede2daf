use {
    bigdecimal::BigDecimal,
    serde::{
        Deserializer,
        Serializer,
        de::{self, Visitor},
    },
    serde_with::{DeserializeAs, SerializeAs},
    std::{fmt, str::FromStr},
};

/// Serializes a [`BigDecimal`] as a decimal string and deserializes it from
/// either a string or a JSON number.
///
/// Numbers are parsed from their shortest textual form, so `1.2` becomes
/// exactly `1.2` and not the nearest binary float.
pub struct Decimal;

impl<'de> DeserializeAs<'de, BigDecimal> for Decimal {
    fn deserialize_as<D>(deserializer: D) -> Result<BigDecimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DecimalVisitor;

        impl Visitor<'_> for DecimalVisitor {
            type Value = BigDecimal;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a decimal number or decimal encoded string")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                BigDecimal::from_str(s.trim()).map_err(|err| {
                    E::custom(format!("failed to decode {s:?} as decimal: {err}"))
                })
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(BigDecimal::from(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(BigDecimal::from(value))
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if !value.is_finite() {
                    return Err(E::custom(format!("{value} is not a decimal")));
                }
                self.visit_str(&value.to_string())
            }
        }

        deserializer.deserialize_any(DecimalVisitor)
    }
}

impl SerializeAs<BigDecimal> for Decimal {
    fn serialize_as<S>(source: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(source)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        serde::{Deserialize, Serialize},
        serde_json::json,
        serde_with::serde_as,
    };

    #[serde_as]
    #[derive(Debug, Deserialize, Serialize)]
    struct Price(#[serde_as(as = "Decimal")] BigDecimal);

    fn decimal(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn deserializes_strings_and_numbers() {
        for (value, expected) in [
            (json!("1.25"), "1.25"),
            (json!(" 0.01 "), "0.01"),
            (json!(1.2), "1.2"),
            (json!(0.1), "0.1"),
            (json!(7), "7"),
            (json!(-3), "-3"),
        ] {
            let Price(price) = serde_json::from_value(value).unwrap();
            assert_eq!(price, decimal(expected));
        }
    }

    #[test]
    fn rejects_non_decimals() {
        assert!(serde_json::from_value::<Price>(json!("cheap")).is_err());
        assert!(serde_json::from_value::<Price>(json!(true)).is_err());
        assert!(serde_json::from_value::<Price>(json!(null)).is_err());
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_value(Price(decimal("1.5"))).unwrap();
        assert_eq!(json, json!("1.5"));
    }
}
