/// The set of addresses that lie within `max_distance` of every desired address.
///
/// Both bounds are inclusive so that a window reaching the top of the address
/// space can still be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
  pub lo: usize,
  pub hi: usize,
}

impl Window {
  pub const UNBOUNDED: Window = Window {
    lo: 0,
    hi: usize::MAX,
  };

  /// Intersects `[d - max_distance, d + max_distance]` over `desired`.
  ///
  /// An empty `desired` yields [`Window::UNBOUNDED`]; disjoint per-address
  /// windows yield `None`.
  pub fn around(
    desired: &[usize],
    max_distance: usize,
  ) -> Option<Window> {
    let mut window = Window::UNBOUNDED;

    for &d in desired {
      window.lo = window.lo.max(d.saturating_sub(max_distance));
      window.hi = window.hi.min(d.saturating_add(max_distance));
    }

    (window.lo <= window.hi).then_some(window)
  }

  pub fn is_unbounded(&self) -> bool {
    *self == Window::UNBOUNDED
  }

  /// Returns `true` if every byte of `[start, start + len)` is inside the window.
  pub fn contains(
    &self,
    start: usize,
    len: usize,
  ) -> bool {
    if len == 0 || start < self.lo {
      return false;
    }

    match start.checked_add(len - 1) {
      Some(last) => last <= self.hi,
      None => false,
    }
  }
}
