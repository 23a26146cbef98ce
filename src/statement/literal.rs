//! Primitive and string literal values
//!
//! Literal mutation has two modes: *randomize* draws a fresh value the same
//! way the factory does when it first creates the literal, *delta* nudges the
//! current value. `mutate` picks randomize with probability
//! `random_perturbation` and otherwise applies a delta, repeating until the
//! value actually changes.

use rand::Rng;

use crate::config::FactoryConfig;
use crate::randomness;
use crate::runtime::Value;
use crate::types::{PrimitiveKind, TypeRef};

#[derive(Debug, Clone)]
pub enum LiteralValue {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

impl PartialEq for LiteralValue {
    fn eq(&self, other: &Self) -> bool {
        use LiteralValue::*;
        match (self, other) {
            (Boolean(a), Boolean(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for LiteralValue {}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

impl LiteralValue {
    /// Zero value of a primitive kind.
    pub fn zero(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Boolean => LiteralValue::Boolean(false),
            PrimitiveKind::Byte => LiteralValue::Byte(0),
            PrimitiveKind::Short => LiteralValue::Short(0),
            PrimitiveKind::Char => LiteralValue::Char('a'),
            PrimitiveKind::Int => LiteralValue::Int(0),
            PrimitiveKind::Long => LiteralValue::Long(0),
            PrimitiveKind::Float => LiteralValue::Float(0.0),
            PrimitiveKind::Double => LiteralValue::Double(0.0),
        }
    }

    /// A random literal of type `ty`, or `None` if `ty` is not primitive-like.
    pub fn random<R: Rng + ?Sized>(ty: &TypeRef, rng: &mut R, config: &FactoryConfig) -> Option<Self> {
        let mut literal = match ty {
            TypeRef::Primitive(kind) => LiteralValue::zero(*kind),
            TypeRef::String => LiteralValue::String(String::new()),
            _ => return None,
        };
        literal.randomize(rng, config);
        Some(literal)
    }

    pub fn type_ref(&self) -> TypeRef {
        match self {
            LiteralValue::String(_) => TypeRef::String,
            other => TypeRef::Primitive(other.primitive_kind().unwrap_or(PrimitiveKind::Int)),
        }
    }

    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        Some(match self {
            LiteralValue::Boolean(_) => PrimitiveKind::Boolean,
            LiteralValue::Byte(_) => PrimitiveKind::Byte,
            LiteralValue::Short(_) => PrimitiveKind::Short,
            LiteralValue::Char(_) => PrimitiveKind::Char,
            LiteralValue::Int(_) => PrimitiveKind::Int,
            LiteralValue::Long(_) => PrimitiveKind::Long,
            LiteralValue::Float(_) => PrimitiveKind::Float,
            LiteralValue::Double(_) => PrimitiveKind::Double,
            LiteralValue::String(_) => return None,
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            LiteralValue::Boolean(v) => Value::Bool(*v),
            LiteralValue::Byte(v) => Value::Int(*v as i64),
            LiteralValue::Short(v) => Value::Int(*v as i64),
            LiteralValue::Char(v) => Value::Char(*v),
            LiteralValue::Int(v) => Value::Int(*v as i64),
            LiteralValue::Long(v) => Value::Int(*v),
            LiteralValue::Float(v) => Value::Float(*v as f64),
            LiteralValue::Double(v) => Value::Float(*v),
            LiteralValue::String(v) => Value::Str(v.clone()),
        }
    }

    /// Value of an integral literal.
    pub fn integral_value(&self) -> Option<i64> {
        match self {
            LiteralValue::Byte(v) => Some(*v as i64),
            LiteralValue::Short(v) => Some(*v as i64),
            LiteralValue::Int(v) => Some(*v as i64),
            LiteralValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Set an integral literal, saturating at the bounds of its kind.
    ///
    /// Returns whether the stored value changed.
    pub fn set_integral(&mut self, value: i64) -> bool {
        let before = self.clone();
        match self {
            LiteralValue::Byte(v) => *v = value.clamp(i8::MIN as i64, i8::MAX as i64) as i8,
            LiteralValue::Short(v) => *v = value.clamp(i16::MIN as i64, i16::MAX as i64) as i16,
            LiteralValue::Int(v) => *v = value.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            LiteralValue::Long(v) => *v = value,
            _ => return false,
        }
        *self != before
    }

    pub fn floating_value(&self) -> Option<f64> {
        match self {
            LiteralValue::Float(v) => Some(*v as f64),
            LiteralValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn set_floating(&mut self, value: f64) -> bool {
        let before = self.clone();
        match self {
            LiteralValue::Float(v) => *v = value as f32,
            LiteralValue::Double(v) => *v = value,
            _ => return false,
        }
        *self != before
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LiteralValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn set_string(&mut self, value: String) -> bool {
        match self {
            LiteralValue::String(s) if *s != value => {
                *s = value;
                true
            }
            _ => false,
        }
    }

    /// Draw a fresh value.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R, config: &FactoryConfig) {
        let max = config.max_int;
        match self {
            LiteralValue::Boolean(v) => *v = rng.gen(),
            LiteralValue::Byte(v) => *v = rng.gen(),
            LiteralValue::Short(v) => {
                *v = randomness::next_bounded_int(rng, max).clamp(i16::MIN as i64, i16::MAX as i64) as i16
            }
            LiteralValue::Char(v) => *v = randomness::next_char(rng),
            LiteralValue::Int(v) => {
                *v = randomness::next_bounded_int(rng, max).clamp(i32::MIN as i64, i32::MAX as i64) as i32
            }
            LiteralValue::Long(v) => *v = randomness::next_bounded_int(rng, max),
            LiteralValue::Float(v) => *v = (randomness::next_gaussian(rng) * max as f64) as f32,
            LiteralValue::Double(v) => *v = randomness::next_gaussian(rng) * max as f64,
            LiteralValue::String(s) => {
                let length = rng.gen_range(0..=config.string_length.min(config.max_string));
                *s = randomness::next_string(rng, length);
            }
        }
    }

    /// Nudge the current value.
    pub fn delta<R: Rng + ?Sized>(&mut self, rng: &mut R, config: &FactoryConfig) {
        let max_delta = config.max_delta as f64;
        match self {
            LiteralValue::Boolean(v) => *v = !*v,
            LiteralValue::Char(v) => {
                let shifted = (*v as i64 + (randomness::next_gaussian(rng) * max_delta).floor() as i64)
                    .clamp(32, 126) as u32;
                if let Some(c) = char::from_u32(shifted) {
                    *v = c;
                }
            }
            LiteralValue::Byte(_) | LiteralValue::Short(_) | LiteralValue::Int(_) | LiteralValue::Long(_) => {
                let current = self.integral_value().unwrap_or(0);
                let step = (randomness::next_gaussian(rng) * max_delta).floor() as i64;
                self.set_integral(current.saturating_add(step));
            }
            LiteralValue::Float(_) | LiteralValue::Double(_) => {
                let current = self.floating_value().unwrap_or(0.0);
                let p: f64 = rng.gen();
                let next = if p < 1.0 / 3.0 {
                    current + randomness::next_gaussian(rng) * max_delta
                } else if p < 2.0 / 3.0 {
                    current + randomness::next_gaussian(rng)
                } else {
                    round_to(current, rng.gen_range(0..=7))
                };
                self.set_floating(next);
            }
            LiteralValue::String(s) => {
                *s = delta_string(s, rng, config.max_string);
            }
        }
    }

    /// Change the value: re-randomize with probability `random_perturbation`,
    /// otherwise apply a delta. Retries until the value differs.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R, config: &FactoryConfig) -> bool {
        let before = self.clone();
        for _ in 0..config.max_attempts {
            if randomness::chance(rng, config.random_perturbation) {
                self.randomize(rng, config);
            } else {
                self.delta(rng, config);
            }
            if *self != before {
                return true;
            }
        }
        false
    }

    /// Java-like source literal.
    pub fn to_code(&self) -> String {
        match self {
            LiteralValue::Boolean(v) => v.to_string(),
            LiteralValue::Byte(v) => format!("(byte){}", v),
            LiteralValue::Short(v) => format!("(short){}", v),
            LiteralValue::Char(v) => format!("'{}'", v.escape_default()),
            LiteralValue::Int(v) => v.to_string(),
            LiteralValue::Long(v) => format!("{}L", v),
            LiteralValue::Float(v) => format!("{:?}F", v),
            LiteralValue::Double(v) => format!("{:?}", v),
            LiteralValue::String(v) => format!("\"{}\"", v.escape_default()),
        }
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        use byteorder::{BigEndian, WriteBytesExt};

        out.push(self.primitive_kind().map_or(0xff, |kind| kind.tag()));
        // Writes into a Vec cannot fail.
        let _ = match self {
            LiteralValue::Boolean(v) => out.write_u8(u8::from(*v)),
            LiteralValue::Byte(v) => out.write_i8(*v),
            LiteralValue::Short(v) => out.write_i16::<BigEndian>(*v),
            LiteralValue::Char(v) => out.write_u32::<BigEndian>(*v as u32),
            LiteralValue::Int(v) => out.write_i32::<BigEndian>(*v),
            LiteralValue::Long(v) => out.write_i64::<BigEndian>(*v),
            LiteralValue::Float(v) => out.write_u32::<BigEndian>(v.to_bits()),
            LiteralValue::Double(v) => out.write_u64::<BigEndian>(v.to_bits()),
            LiteralValue::String(v) => out
                .write_u32::<BigEndian>(v.len() as u32)
                .map(|_| out.extend_from_slice(v.as_bytes())),
        };
    }
}

/// Character-level edit of a string: deletions, replacements and a burst of
/// insertions at one position, each phase applied with probability 1/3.
fn delta_string<R: Rng + ?Sized>(current: &str, rng: &mut R, max_string: usize) -> String {
    let mut chars: Vec<char> = current.chars().collect();
    let p = 1.0 / 3.0;

    if !chars.is_empty() && rng.gen::<f64>() < p {
        let keep = 1.0 / chars.len() as f64;
        chars.retain(|_| rng.gen::<f64>() >= keep);
    }

    if !chars.is_empty() && rng.gen::<f64>() < p {
        let change = 1.0 / chars.len() as f64;
        for c in chars.iter_mut() {
            if rng.gen::<f64>() < change {
                *c = randomness::next_char(rng);
            }
        }
    }

    if rng.gen::<f64>() < p {
        let position = if chars.is_empty() { 0 } else { rng.gen_range(0..chars.len()) };
        let mut count = 1;
        while rng.gen::<f64>() <= 0.5f64.powi(count) && chars.len() < max_string {
            count += 1;
            chars.insert(position, randomness::next_char(rng));
        }
    }

    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::randomness::seeded;

    #[test]
    fn test_random_literals_respect_bounds() {
        let config = FactoryConfig::default();
        let mut rng = seeded(11);
        for _ in 0..200 {
            match LiteralValue::random(&TypeRef::int(), &mut rng, &config) {
                Some(LiteralValue::Int(v)) => assert!((v as i64).abs() <= config.max_int),
                other => panic!("unexpected literal {:?}", other),
            }
            let s = LiteralValue::random(&TypeRef::String, &mut rng, &config).unwrap();
            assert!(s.as_str().unwrap().chars().count() <= config.string_length);
        }
        assert!(LiteralValue::random(&TypeRef::array_of(TypeRef::int()), &mut rng, &config).is_none());
    }

    #[test]
    fn test_mutate_always_changes_value() {
        let config = FactoryConfig::default();
        let mut rng = seeded(12);
        let mut literals = vec![
            LiteralValue::Boolean(true),
            LiteralValue::Int(5),
            LiteralValue::Double(1.5),
            LiteralValue::Char('x'),
            LiteralValue::String("abc".to_string()),
        ];
        for literal in literals.iter_mut() {
            for _ in 0..50 {
                let before = literal.clone();
                assert!(literal.mutate(&mut rng, &config));
                assert_ne!(*literal, before);
                assert_eq!(literal.type_ref(), before.type_ref());
            }
        }
    }

    #[test]
    fn test_set_integral_saturates() {
        let mut byte = LiteralValue::Byte(3);
        assert!(byte.set_integral(1000));
        assert_eq!(byte, LiteralValue::Byte(i8::MAX));
        assert!(!byte.set_integral(500));
        let mut string = LiteralValue::String("x".to_string());
        assert!(!string.set_integral(1));
    }

    #[test]
    fn test_code_rendering() {
        assert_eq!(LiteralValue::Long(3).to_code(), "3L");
        assert_eq!(LiteralValue::String("a\"b".to_string()).to_code(), "\"a\\\"b\"");
        assert_eq!(LiteralValue::Double(2.0).to_code(), "2.0");
    }
}
