/// Rounds `value` up to the next multiple of `granularity`.
///
/// Unlike a mask-based round up, the granularity does not have to be a power
/// of two, so the same macro serves block sizes and reported page sizes.
///
/// # Examples
///
/// ```rust
/// use tagalloc::align_up;
///
/// assert_eq!(align_up!(13usize, 32), 32);
/// assert_eq!(align_up!(64usize, 32), 64);
/// assert_eq!(align_up!(4097usize, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_up {
  ($value:expr, $granularity:expr) => {
    (($value).div_ceil($granularity) * ($granularity))
  };
}

/// Rounds `value` down to a multiple of `granularity`.
///
/// ```rust
/// use tagalloc::align_down;
///
/// assert_eq!(align_down!(63usize, 32), 32);
/// assert_eq!(align_down!(64usize, 32), 64);
/// ```
#[macro_export]
macro_rules! align_down {
  ($value:expr, $granularity:expr) => {
    (($value) / ($granularity) * ($granularity))
  };
}
