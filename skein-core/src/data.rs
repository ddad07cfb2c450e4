//! The self-describing value universe of the fabric.
//!
//! Every payload that crosses a topic — store entries, commands, events,
//! encoded errors — is a [`Data`] value. `Data` is a tagged union with a
//! total order, so values can key sets and tables, and with type-dispatched
//! reshaping operations (`add`, `subtract`, `index_into`) that back the
//! store's modifier vocabulary.

use crate::error::{Error, ErrorKind};
use crate::types::{Timespan, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

/// A named enumeration value.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct EnumValue {
    /// The tag name.
    pub name: String,
}

impl EnumValue {
    /// Create an enum value from a tag name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Transport protocol tag of a [`Port`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum PortProtocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// ICMP (the "port" is the message type).
    Icmp,
    /// Unknown or unspecified protocol.
    #[default]
    Unknown,
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Icmp => f.write_str("icmp"),
            Self::Unknown => f.write_str("?"),
        }
    }
}

/// A transport-layer port with its protocol tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Port {
    /// The port number.
    pub number: u16,
    /// The protocol the port belongs to.
    pub protocol: PortProtocol,
}

impl Port {
    /// Create a port value.
    pub const fn new(number: u16, protocol: PortProtocol) -> Self {
        Self { number, protocol }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

/// An IP subnet: a network address plus prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subnet {
    /// The network address.
    pub network: IpAddr,
    /// The prefix length in bits.
    pub length: u8,
}

impl Subnet {
    /// Create a subnet value.
    pub const fn new(network: IpAddr, length: u8) -> Self {
        Self { network, length }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.length)
    }
}

/// Type tag of a [`Data`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// The absent value.
    None,
    /// Boolean.
    Boolean,
    /// Unsigned integer.
    Count,
    /// Signed integer.
    Integer,
    /// Double-precision real.
    Real,
    /// Text.
    String,
    /// IP address.
    Address,
    /// IP subnet.
    Subnet,
    /// Transport-layer port.
    Port,
    /// Absolute point in time.
    Timestamp,
    /// Signed duration.
    Timespan,
    /// Named enumeration value.
    Enum,
    /// Set of values.
    Set,
    /// Value-to-value mapping.
    Table,
    /// Ordered sequence of values.
    Vector,
}

impl DataType {
    /// The neutral value of this type, used to initialize absent targets of
    /// an `add`.
    pub fn zero(self) -> Data {
        match self {
            Self::None => Data::None,
            Self::Boolean => Data::Boolean(false),
            Self::Count => Data::Count(0),
            Self::Integer => Data::Integer(0),
            Self::Real => Data::Real(0.0),
            Self::String => Data::String(String::new()),
            Self::Address => Data::Address(IpAddr::from([0u8; 4])),
            Self::Subnet => Data::Subnet(Subnet::new(IpAddr::from([0u8; 4]), 0)),
            Self::Port => Data::Port(Port::default()),
            Self::Timestamp => Data::Timestamp(Timestamp::EPOCH),
            Self::Timespan => Data::Timespan(Timespan::ZERO),
            Self::Enum => Data::Enum(EnumValue::default()),
            Self::Set => Data::Set(BTreeSet::new()),
            Self::Table => Data::Table(BTreeMap::new()),
            Self::Vector => Data::Vector(Vec::new()),
        }
    }

    /// The tag name, as it appears in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Boolean => "boolean",
            Self::Count => "count",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::String => "string",
            Self::Address => "address",
            Self::Subnet => "subnet",
            Self::Port => "port",
            Self::Timestamp => "timestamp",
            Self::Timespan => "timespan",
            Self::Enum => "enum",
            Self::Set => "set",
            Self::Table => "table",
            Self::Vector => "vector",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value in the fabric's tagged union.
///
/// `Data` carries a total order: scalars order within their type, composites
/// order lexicographically, and values of different types order by type tag.
/// Reals use the IEEE total order so `Data` can key ordered containers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Data {
    /// The absent value.
    None,
    /// Boolean.
    Boolean(bool),
    /// Unsigned integer.
    Count(u64),
    /// Signed integer.
    Integer(i64),
    /// Double-precision real.
    Real(f64),
    /// Text.
    String(String),
    /// IP address.
    Address(IpAddr),
    /// IP subnet.
    Subnet(Subnet),
    /// Transport-layer port.
    Port(Port),
    /// Absolute point in time.
    Timestamp(Timestamp),
    /// Signed duration.
    Timespan(Timespan),
    /// Named enumeration value.
    Enum(EnumValue),
    /// Set of values.
    Set(BTreeSet<Data>),
    /// Value-to-value mapping.
    Table(BTreeMap<Data, Data>),
    /// Ordered sequence of values.
    Vector(Vec<Data>),
}

impl Data {
    /// The type tag of this value.
    pub const fn ty(&self) -> DataType {
        match self {
            Self::None => DataType::None,
            Self::Boolean(_) => DataType::Boolean,
            Self::Count(_) => DataType::Count,
            Self::Integer(_) => DataType::Integer,
            Self::Real(_) => DataType::Real,
            Self::String(_) => DataType::String,
            Self::Address(_) => DataType::Address,
            Self::Subnet(_) => DataType::Subnet,
            Self::Port(_) => DataType::Port,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Timespan(_) => DataType::Timespan,
            Self::Enum(_) => DataType::Enum,
            Self::Set(_) => DataType::Set,
            Self::Table(_) => DataType::Table,
            Self::Vector(_) => DataType::Vector,
        }
    }

    /// Whether this is the absent value.
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Augment this value with `delta`, with a type-specific meaning of
    /// "add": arithmetic for numbers, temporal shift for timestamps,
    /// concatenation for strings, insertion for containers. Table deltas
    /// must be two-element `[index, value]` vectors.
    pub fn add(&mut self, delta: Data) -> Result<(), Error> {
        match (&mut *self, delta) {
            (Self::Count(a), Self::Count(b)) => {
                *a = a.wrapping_add(b);
                Ok(())
            }
            (Self::Integer(a), Self::Integer(b)) => {
                *a = a.wrapping_add(b);
                Ok(())
            }
            (Self::Real(a), Self::Real(b)) => {
                *a += b;
                Ok(())
            }
            (Self::Timestamp(t), Self::Timespan(d)) => {
                *t += d;
                Ok(())
            }
            (Self::Timespan(a), Self::Timespan(b)) => {
                *a = *a + b;
                Ok(())
            }
            (Self::String(s), Self::String(tail)) => {
                s.push_str(&tail);
                Ok(())
            }
            (Self::Set(xs), element) => {
                xs.insert(element);
                Ok(())
            }
            (Self::Table(tbl), Self::Vector(binding)) if binding.len() == 2 => {
                let mut it = binding.into_iter();
                let index = it.next().unwrap_or(Data::None);
                let value = it.next().unwrap_or(Data::None);
                tbl.insert(index, value);
                Ok(())
            }
            (Self::Vector(xs), element) => {
                xs.push(element);
                Ok(())
            }
            (target, delta) => Err(Error::with_message(
                ErrorKind::TypeClash,
                format!("cannot add {} to {}", delta.ty(), target.ty()),
            )),
        }
    }

    /// Diminish this value by `delta`: arithmetic for numbers, temporal
    /// shift for timestamps, element removal for sets and tables, and
    /// remove-last for vectors (the delta is not consulted for vectors).
    pub fn subtract(&mut self, delta: &Data) -> Result<(), Error> {
        match (&mut *self, delta) {
            (Self::Count(a), Self::Count(b)) => {
                *a = a.wrapping_sub(*b);
                Ok(())
            }
            (Self::Integer(a), Self::Integer(b)) => {
                *a = a.wrapping_sub(*b);
                Ok(())
            }
            (Self::Real(a), Self::Real(b)) => {
                *a -= b;
                Ok(())
            }
            (Self::Timestamp(t), Self::Timespan(d)) => {
                *t -= *d;
                Ok(())
            }
            (Self::Timespan(a), Self::Timespan(b)) => {
                *a = *a - *b;
                Ok(())
            }
            (Self::Set(xs), element) => {
                xs.remove(element);
                Ok(())
            }
            (Self::Table(tbl), index) => {
                tbl.remove(index);
                Ok(())
            }
            (Self::Vector(xs), _) => {
                xs.pop();
                Ok(())
            }
            (target, delta) => Err(Error::with_message(
                ErrorKind::TypeClash,
                format!("cannot subtract {} from {}", delta.ty(), target.ty()),
            )),
        }
    }

    /// Look up `index` in a container value.
    ///
    /// Tables and vectors yield the value at the index (or `no_such_key`);
    /// sets yield a boolean membership value.
    pub fn index_into(&self, index: &Data) -> Result<Data, Error> {
        match self {
            Self::Table(tbl) => tbl.get(index).cloned().ok_or_else(|| {
                Error::with_message(ErrorKind::NoSuchKey, "no such index in table")
            }),
            Self::Vector(xs) => {
                let position = match index {
                    Data::Count(n) => usize::try_from(*n).ok(),
                    Data::Integer(n) if *n >= 0 => usize::try_from(*n).ok(),
                    _ => {
                        return Err(Error::with_message(
                            ErrorKind::TypeClash,
                            format!("cannot index vector with {}", index.ty()),
                        ))
                    }
                };
                position.and_then(|p| xs.get(p)).cloned().ok_or_else(|| {
                    Error::with_message(ErrorKind::NoSuchKey, "vector index out of range")
                })
            }
            Self::Set(xs) => Ok(Data::Boolean(xs.contains(index))),
            other => Err(Error::with_message(
                ErrorKind::TypeClash,
                format!("cannot index into {}", other.ty()),
            )),
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Self::None
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Data {}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Data {
    fn cmp(&self, other: &Self) -> Ordering {
        use Data::*;
        match (self, other) {
            (None, None) => Ordering::Equal,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Count(a), Count(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Real(a), Real(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Address(a), Address(b)) => a.cmp(b),
            (Subnet(a), Subnet(b)) => a.cmp(b),
            (Port(a), Port(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Timespan(a), Timespan(b)) => a.cmp(b),
            (Enum(a), Enum(b)) => a.cmp(b),
            (Set(a), Set(b)) => a.cmp(b),
            (Table(a), Table(b)) => a.cmp(b),
            (Vector(a), Vector(b)) => a.cmp(b),
            (a, b) => a.ty().cmp(&b.ty()),
        }
    }
}

impl Hash for Data {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty().hash(state);
        match self {
            Self::None => {}
            Self::Boolean(x) => x.hash(state),
            Self::Count(x) => x.hash(state),
            Self::Integer(x) => x.hash(state),
            Self::Real(x) => x.to_bits().hash(state),
            Self::String(x) => x.hash(state),
            Self::Address(x) => x.hash(state),
            Self::Subnet(x) => x.hash(state),
            Self::Port(x) => x.hash(state),
            Self::Timestamp(x) => x.hash(state),
            Self::Timespan(x) => x.hash(state),
            Self::Enum(x) => x.hash(state),
            Self::Set(xs) => xs.hash(state),
            Self::Table(xs) => xs.hash(state),
            Self::Vector(xs) => xs.hash(state),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("nil"),
            Self::Boolean(x) => write!(f, "{}", if *x { "T" } else { "F" }),
            Self::Count(x) => write!(f, "{}", x),
            Self::Integer(x) => write!(f, "{}", x),
            Self::Real(x) => write!(f, "{}", x),
            Self::String(x) => write!(f, "{:?}", x),
            Self::Address(x) => write!(f, "{}", x),
            Self::Subnet(x) => write!(f, "{}", x),
            Self::Port(x) => write!(f, "{}", x),
            Self::Timestamp(x) => write!(f, "{}", x),
            Self::Timespan(x) => write!(f, "{}", x),
            Self::Enum(x) => write!(f, "{}", x),
            Self::Set(xs) => {
                f.write_str("{")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                f.write_str("}")
            }
            Self::Table(xs) => {
                f.write_str("{")?;
                for (i, (k, v)) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} -> {}", k, v)?;
                }
                f.write_str("}")
            }
            Self::Vector(xs) => {
                f.write_str("[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Data {
    fn from(x: bool) -> Self {
        Self::Boolean(x)
    }
}

impl From<u64> for Data {
    fn from(x: u64) -> Self {
        Self::Count(x)
    }
}

impl From<i64> for Data {
    fn from(x: i64) -> Self {
        Self::Integer(x)
    }
}

impl From<f64> for Data {
    fn from(x: f64) -> Self {
        Self::Real(x)
    }
}

impl From<&str> for Data {
    fn from(x: &str) -> Self {
        Self::String(x.to_owned())
    }
}

impl From<String> for Data {
    fn from(x: String) -> Self {
        Self::String(x)
    }
}

impl From<IpAddr> for Data {
    fn from(x: IpAddr) -> Self {
        Self::Address(x)
    }
}

impl From<Subnet> for Data {
    fn from(x: Subnet) -> Self {
        Self::Subnet(x)
    }
}

impl From<Port> for Data {
    fn from(x: Port) -> Self {
        Self::Port(x)
    }
}

impl From<Timestamp> for Data {
    fn from(x: Timestamp) -> Self {
        Self::Timestamp(x)
    }
}

impl From<Timespan> for Data {
    fn from(x: Timespan) -> Self {
        Self::Timespan(x)
    }
}

impl From<EnumValue> for Data {
    fn from(x: EnumValue) -> Self {
        Self::Enum(x)
    }
}

impl From<BTreeSet<Data>> for Data {
    fn from(x: BTreeSet<Data>) -> Self {
        Self::Set(x)
    }
}

impl From<BTreeMap<Data, Data>> for Data {
    fn from(x: BTreeMap<Data, Data>) -> Self {
        Self::Table(x)
    }
}

impl From<Vec<Data>> for Data {
    fn from(x: Vec<Data>) -> Self {
        Self::Vector(x)
    }
}

impl<T: Into<Data>> From<Option<T>> for Data {
    fn from(x: Option<T>) -> Self {
        x.map_or(Self::None, Into::into)
    }
}
