/// Rounds `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` when the rounded value does not fit in a `usize`.
///
/// # Examples
///
/// ```rust
/// use nearalloc::align_up;
///
/// assert_eq!(align_up!(1usize, 0x1000usize), Some(0x1000));
/// assert_eq!(align_up!(0x1000usize, 0x1000usize), Some(0x1000));
/// assert_eq!(align_up!(usize::MAX, 0x1000usize), None);
/// ```
#[macro_export]
macro_rules! align_up {
  ($value:expr, $align:expr) => {
    ($value).checked_add(($align) - 1).map(|v: usize| v & !(($align) - 1))
  };
}

/// Rounds `value` down to a multiple of `align` (a power of two).
///
/// # Examples
///
/// ```rust
/// use nearalloc::align_down;
///
/// assert_eq!(align_down!(0x1fffusize, 0x1000usize), 0x1000);
/// ```
#[macro_export]
macro_rules! align_down {
  ($value:expr, $align:expr) => {
    ($value) & !(($align) - 1)
  };
}

#[cfg(test)]
mod tests {
  #[test]
  fn test_align() {
    let page: usize = 0x1000;

    for i in 0..10 {
      let sizes = (page * i + 1)..=(page * (i + 1));

      for size in sizes.step_by(0x1ff) {
        assert_eq!(Some(page * (i + 1)), align_up!(size, page));
        assert_eq!(page * i, align_down!(size - 1, page));
      }
    }
  }

  #[test]
  fn test_align_up_overflow() {
    assert_eq!(align_up!(usize::MAX - 1, 0x1000usize), None);
    assert_eq!(align_up!(0usize, 0x1000usize), Some(0));
  }
}
