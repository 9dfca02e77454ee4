/// Iterative cartesian-product generator.
///
/// Yields every combination of one value per axis as a lazy, finite
/// sequence. The iterator is `Clone`, so a sequence can be restarted or
/// forked cheaply. Test helpers use this to build cell-request grids (e.g.
/// one request per `(year, department)` pair) without recursion.
#[derive(Clone, Debug)]
pub struct CartesianProduct<T> {
    axes: Vec<Vec<T>>,
    /// Current index per axis; `None` once exhausted.
    cursor: Option<Vec<usize>>,
}

impl<T: Clone> CartesianProduct<T> {
    pub fn new<I, A>(axes: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: IntoIterator<Item = T>,
    {
        let axes: Vec<Vec<T>> = axes.into_iter().map(|a| a.into_iter().collect()).collect();
        // An empty axis makes the whole product empty; no axes at all still
        // yield the single empty combination.
        let cursor = if axes.iter().any(Vec::is_empty) {
            None
        } else {
            Some(vec![0; axes.len()])
        };
        Self { axes, cursor }
    }

    /// Number of combinations the full sequence yields.
    pub fn combination_count(&self) -> usize {
        if self.axes.iter().any(Vec::is_empty) {
            0
        } else {
            self.axes.iter().map(Vec::len).product()
        }
    }

    /// Rewinds to the first combination.
    pub fn restart(&mut self) {
        self.cursor = if self.axes.iter().any(Vec::is_empty) {
            None
        } else {
            Some(vec![0; self.axes.len()])
        };
    }
}

impl<T: Clone> Iterator for CartesianProduct<T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        let combination: Vec<T> = cursor
            .iter()
            .zip(&self.axes)
            .map(|(&i, axis)| axis[i].clone())
            .collect();

        // Odometer increment, rightmost axis fastest.
        let mut done = true;
        for (i, axis) in self.axes.iter().enumerate().rev() {
            cursor[i] += 1;
            if cursor[i] < axis.len() {
                done = false;
                break;
            }
            cursor[i] = 0;
        }
        if done {
            self.cursor = None;
        }
        Some(combination)
    }
}
