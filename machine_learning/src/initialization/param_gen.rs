/// A finite source of values for filling parameter buffers and starting images.
///
/// Layers pull from it in the order they are laid out, so the same generator state always
/// produces the same network.
pub trait ParamGen {
    /// Hands out up to `n` values.
    ///
    /// # Returns
    /// `None` once the source is dry, otherwise between one and `n` values.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;
}
