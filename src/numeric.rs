use num_traits::{cast::ToPrimitive, Float, NumCast};
use std::{
    cmp::Ordering,
    fmt::{Debug, Display},
    str::FromStr,
};

/// Assert two float values are the same up to `eps`.
#[allow(dead_code)]
pub fn assert_float_eq<T>(left: T, right: T, eps: T)
where
    T: Float + Display,
{
    if left.is_nan() {
        assert!(right.is_nan(), "left is NaN, but right is not");
    } else {
        let diff = (left - right).abs();
        assert!(
            diff < eps,
            "values |{} - {}| ≥ {} (diff: {})",
            left,
            right,
            eps,
            diff
        );
    }
}

/// Assert two float slices are the same up to `eps`.
#[allow(dead_code)]
pub fn assert_floats_eq<T>(left: &[T], right: &[T], eps: T)
where
    T: Float + Display,
{
    assert_eq!(left.len(), right.len());
    for (l, r) in left.iter().zip(right.iter()) {
        assert_float_eq(*l, *r, eps)
    }
}

/// Haldane's mapping function: recombination fraction to map distance
/// in centiMorgans.
pub fn haldane_to_dist<T: Float>(rf: T) -> T {
    let half = T::from(0.5).unwrap();
    -T::from(50.0).unwrap() * (T::one() - rf / half).ln()
}

/// Inverse Haldane's mapping function: map distance in centiMorgans to a
/// recombination fraction.
pub fn haldane_to_rf<T: Float>(dist_cm: T) -> T {
    T::from(0.5).unwrap() * (T::one() - (T::from(-2.0).unwrap() * dist_cm / T::from(100.0).unwrap()).exp())
}

/// Kosambi's mapping function: recombination fraction to map distance
/// in centiMorgans.
pub fn kosambi_to_dist<T: Float>(rf: T) -> T {
    let two_r = T::from(2.0).unwrap() * rf;
    T::from(25.0).unwrap() * ((T::one() + two_r) / (T::one() - two_r)).ln()
}

/// Inverse Kosambi's mapping function: map distance in centiMorgans to a
/// recombination fraction.
pub fn kosambi_to_rf<T: Float>(dist_cm: T) -> T {
    let d_morgan = dist_cm / T::from(100.0).unwrap();
    T::from(0.5).unwrap() * (T::from(2.0).unwrap() * d_morgan).tanh()
}

/// The mapping function relating recombination fractions and map distances.
///
/// Haldane assumes no crossover interference; Kosambi allows moderate
/// interference and is the more common choice for experimental crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapFunction {
    #[default]
    Haldane,
    Kosambi,
}

impl MapFunction {
    /// Convert a recombination fraction in [0, 0.5) to centiMorgans.
    pub fn to_dist(&self, rf: f64) -> f64 {
        match self {
            MapFunction::Haldane => haldane_to_dist(rf),
            MapFunction::Kosambi => kosambi_to_dist(rf),
        }
    }

    /// Convert a map distance in centiMorgans to a recombination fraction.
    pub fn to_rf(&self, dist_cm: f64) -> f64 {
        match self {
            MapFunction::Haldane => haldane_to_rf(dist_cm),
            MapFunction::Kosambi => kosambi_to_rf(dist_cm),
        }
    }
}

impl FromStr for MapFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "haldane" => Ok(MapFunction::Haldane),
            "kosambi" => Ok(MapFunction::Kosambi),
            other => Err(format!("unknown map function: {}", other)),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum SearchResult {
    Exact(usize),
    LowerBound(usize),
    UpperBound(usize),
    LeftOf(usize),
}

impl SearchResult {
    #[allow(dead_code)]
    pub fn get_index(&self) -> usize {
        match self {
            SearchResult::Exact(idx) => *idx,
            SearchResult::LeftOf(idx) => *idx,
            SearchResult::LowerBound(idx) => *idx,
            SearchResult::UpperBound(idx) => *idx,
        }
    }
}

pub fn search_sorted<T: PartialOrd>(vec: &[T], new_val: T) -> SearchResult {
    let mut left = 0;
    let mut right = vec.len();
    while left < right {
        let mid = left + (right - left) / 2;

        match vec[mid].partial_cmp(&new_val).unwrap() {
            Ordering::Less => left = mid + 1,
            Ordering::Greater => right = mid,
            Ordering::Equal => return SearchResult::Exact(mid),
        }
    }

    if left == 0 {
        SearchResult::LowerBound(left)
    } else if left < vec.len() {
        SearchResult::LeftOf(left)
    } else {
        SearchResult::UpperBound(left)
    }
}

pub fn interp1d<Tx, Ty>(x: &[Tx], y: &[Ty], x0: Tx) -> Option<Ty>
where
    Tx: PartialOrd + ToPrimitive + Copy + Debug,
    Ty: ToPrimitive + NumCast + Copy + Debug,
{
    assert!(x.len() == y.len());
    let index = search_sorted(x, x0);
    match index {
        SearchResult::Exact(idx) => Some(y[idx]),
        SearchResult::LeftOf(idx) => {
            if idx == 0 || idx >= x.len() {
                return None;
            }

            let x1 = ToPrimitive::to_f64(&x[idx - 1])?;
            let x2 = ToPrimitive::to_f64(&x[idx])?;
            let y1 = ToPrimitive::to_f64(&y[idx - 1])?;
            let y2 = ToPrimitive::to_f64(&y[idx])?;
            let x0 = ToPrimitive::to_f64(&x0)?;

            // linear interpolation
            let y0 = y1 + (y2 - y1) * (x0 - x1) / (x2 - x1);

            NumCast::from(y0)
        }
        SearchResult::LowerBound(_) => Some(y[0]),
        SearchResult::UpperBound(idx) => Some(y[idx - 1]),
    }
}
