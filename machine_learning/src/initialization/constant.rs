use super::ParamGen;

/// Yields a fixed number of copies of one value, used for the biases of freshly built layers.
pub struct ConstParamGen {
    value: f32,
    left: usize,
}

impl ConstParamGen {
    /// # Arguments
    /// * `value` - What every sample holds.
    /// * `limit` - How many values are handed out before the generator runs dry.
    pub fn new(value: f32, limit: usize) -> Self {
        Self { value, left: limit }
    }
}

impl ParamGen for ConstParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        let take = n.min(self.left);
        (self.left > 0).then(|| {
            self.left -= take;
            vec![self.value; take]
        })
    }
}
