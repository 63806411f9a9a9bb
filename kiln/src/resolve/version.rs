use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use super::ResolveError;

/// Maven-style version with ordering over its numeric and qualifier items, so `1.10` > `1.9`, `1.0` == `1`, and
/// `1.0-alpha` < `1.0-rc1` < `1.0` < `1.0-sp1`.
#[derive(Clone, Debug)]
pub struct Version {
  text: String,
  items: Vec<Item>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Item {
  Number(u64),
  Qualifier(String),
}

impl Version {
  pub fn parse(text: &str) -> Self {
    let mut items = Vec::new();
    for part in text.trim().split(|c| c == '.' || c == '-') {
      let mut current = String::new();
      let mut digits = None;
      for c in part.chars() {
        let is_digit = c.is_ascii_digit();
        if digits.is_some_and(|d| d != is_digit) {
          items.push(Item::new(&current));
          current.clear();
        }
        digits = Some(is_digit);
        current.push(c);
      }
      if !current.is_empty() {
        items.push(Item::new(&current));
      }
    }
    // Trailing zeros and release qualifiers carry no ordering information.
    while items.last().is_some_and(Item::is_null) {
      items.pop();
    }
    Self { text: text.trim().to_string(), items }
  }

  #[inline]
  pub fn as_str(&self) -> &str { &self.text }
}

impl Item {
  fn new(text: &str) -> Self {
    match text.parse::<u64>() {
      Ok(number) => Item::Number(number),
      Err(_) => Item::Qualifier(text.to_ascii_lowercase()),
    }
  }

  fn is_null(&self) -> bool {
    match self {
      Item::Number(n) => *n == 0,
      Item::Qualifier(q) => qualifier_rank(q) == RELEASE_RANK,
    }
  }

  fn compare(left: Option<&Item>, right: Option<&Item>) -> Ordering {
    match (left, right) {
      (None, None) => Ordering::Equal,
      (Some(Item::Number(l)), Some(Item::Number(r))) => l.cmp(r),
      (Some(Item::Number(_)), Some(Item::Qualifier(_))) => Ordering::Greater,
      (Some(Item::Qualifier(_)), Some(Item::Number(_))) => Ordering::Less,
      (Some(Item::Qualifier(l)), Some(Item::Qualifier(r))) => compare_qualifiers(l, r),
      (Some(Item::Number(n)), None) => n.cmp(&0),
      (None, Some(Item::Number(n))) => 0.cmp(n),
      (Some(Item::Qualifier(q)), None) => compare_qualifiers(q, ""),
      (None, Some(Item::Qualifier(q))) => compare_qualifiers("", q),
    }
  }
}

const RELEASE_RANK: u8 = 5;

fn qualifier_rank(qualifier: &str) -> u8 {
  match qualifier {
    "alpha" | "a" => 0,
    "beta" | "b" => 1,
    "milestone" | "m" => 2,
    "rc" | "cr" => 3,
    "snapshot" => 4,
    "" | "ga" | "final" | "release" => RELEASE_RANK,
    "sp" => 6,
    _ => 7,
  }
}

fn compare_qualifiers(left: &str, right: &str) -> Ordering {
  let (l, r) = (qualifier_rank(left), qualifier_rank(right));
  if l == 7 && r == 7 {
    left.cmp(right)
  } else {
    l.cmp(&r)
  }
}

impl Ord for Version {
  fn cmp(&self, other: &Self) -> Ordering {
    let len = self.items.len().max(other.items.len());
    for i in 0..len {
      match Item::compare(self.items.get(i), other.items.get(i)) {
        Ordering::Equal => continue,
        ordering => return ordering,
      }
    }
    Ordering::Equal
  }
}
impl PartialOrd for Version {
  #[inline]
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}
impl PartialEq for Version {
  #[inline]
  fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}
impl Eq for Version {}

impl Display for Version {
  #[inline]
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.text) }
}

/// Version range such as `[1.0,2.0)`, `[1.5,)`, `(,1.0]`, `[1.2]`, or a union `[1,2),[3,4)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionRange {
  intervals: Vec<Interval>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Interval {
  lower: Option<(Version, bool)>,
  upper: Option<(Version, bool)>,
}

impl Interval {
  fn contains(&self, version: &Version) -> bool {
    let above = match &self.lower {
      Some((lower, true)) => version >= lower,
      Some((lower, false)) => version > lower,
      None => true,
    };
    let below = match &self.upper {
      Some((upper, true)) => version <= upper,
      Some((upper, false)) => version < upper,
      None => true,
    };
    above && below
  }
}

impl VersionRange {
  /// Returns `true` if `text` is written as a range rather than a plain (soft) version.
  #[inline]
  pub fn is_range(text: &str) -> bool {
    let text = text.trim();
    text.starts_with('[') || text.starts_with('(')
  }

  pub fn parse(text: &str) -> Result<Self, ResolveError> {
    let invalid = || ResolveError::InvalidVersionRange(text.to_string());
    let mut intervals = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
      let inclusive_lower = match rest.as_bytes()[0] {
        b'[' => true,
        b'(' => false,
        _ => return Err(invalid()),
      };
      let end = rest.find(|c| c == ']' || c == ')').ok_or_else(invalid)?;
      let inclusive_upper = rest.as_bytes()[end] == b']';
      let body = &rest[1..end];
      let interval = match body.split_once(',') {
        Some((lower, upper)) => {
          let (lower, upper) = (lower.trim(), upper.trim());
          Interval {
            lower: (!lower.is_empty()).then(|| (Version::parse(lower), inclusive_lower)),
            upper: (!upper.is_empty()).then(|| (Version::parse(upper), inclusive_upper)),
          }
        }
        None => {
          // `[1.2]` pins exactly one version.
          if !inclusive_lower || !inclusive_upper || body.trim().is_empty() {
            return Err(invalid());
          }
          let version = Version::parse(body);
          Interval { lower: Some((version.clone(), true)), upper: Some((version, true)) }
        }
      };
      intervals.push(interval);
      rest = rest[end + 1..].trim_start();
      if let Some(next) = rest.strip_prefix(',') {
        rest = next.trim_start();
        if rest.is_empty() {
          return Err(invalid());
        }
      } else if !rest.is_empty() {
        return Err(invalid());
      }
    }
    if intervals.is_empty() {
      return Err(invalid());
    }
    Ok(Self { intervals })
  }

  #[inline]
  pub fn contains(&self, version: &Version) -> bool {
    self.intervals.iter().any(|i| i.contains(version))
  }

  /// Selects the highest version among `available` that lies inside this range.
  pub fn select<'a>(&self, available: impl IntoIterator<Item=&'a str>) -> Option<&'a str> {
    available.into_iter()
      .map(|text| (text, Version::parse(text)))
      .filter(|(_, version)| self.contains(version))
      .max_by(|(_, l), (_, r)| l.cmp(r))
      .map(|(text, _)| text)
  }
}
