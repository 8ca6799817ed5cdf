/// Provides a constant default value.
pub trait Init {
    /// `Self`'s default value.
    const INIT: Self;
}
