//! 8-connected component labelling over binary masks.
//!
//! Works on horizontal runs joined through a disjoint-set forest, so the cost
//! grows with the number of runs rather than the number of pixels.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub area: usize,
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
    sum_x: f64,
    sum_y: f64,
}

impl Component {
    fn new(x: usize, y: usize) -> Self {
        Self {
            area: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum_x: 0.0,
            sum_y: 0.0,
        }
    }

    pub fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width() as f64 / self.height() as f64
    }

    /// Mean of the pixel centres.
    pub fn centroid(&self) -> (f64, f64) {
        let area = self.area.max(1) as f64;
        (self.sum_x / area + 0.5, self.sum_y / area + 0.5)
    }
}

#[derive(Clone, Copy)]
struct RowRun {
    start: usize,
    end: usize,
    row: usize,
    label: u32,
}

/// Reusable buffers for repeated labelling of same-sized masks.
#[derive(Default)]
pub struct Labeler {
    runs: Vec<RowRun>,
    offsets: Vec<usize>,
    dsu: DisjointSet,
    /// Per pixel: `0` for background, otherwise component index + 1.
    labels: Vec<u32>,
}

impl Labeler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn label(&mut self, mask: &[u8], width: usize, height: usize) -> Vec<Component> {
        assert_eq!(mask.len(), width * height);
        self.labels.clear();
        self.labels.resize(mask.len(), 0);
        self.runs.clear();
        self.offsets.clear();
        self.offsets.resize(height + 1, 0);

        for row in 0..height {
            self.offsets[row] = self.runs.len();
            let row_data = &mask[row * width..(row + 1) * width];
            let mut x = 0usize;
            while x < width {
                while x < width && row_data[x] == 0 {
                    x += 1;
                }
                if x >= width {
                    break;
                }
                let start = x;
                while x < width && row_data[x] != 0 {
                    x += 1;
                }
                self.runs.push(RowRun {
                    start,
                    end: x,
                    row,
                    label: 0,
                });
            }
        }
        self.offsets[height] = self.runs.len();
        if self.runs.is_empty() {
            return Vec::new();
        }

        self.dsu.clear();
        for run in self.runs.iter_mut() {
            run.label = self.dsu.make_set();
        }

        for row in 1..height {
            let mut prev = self.offsets[row - 1];
            let prev_end = self.offsets[row];
            let mut curr = self.offsets[row];
            let curr_end = self.offsets[row + 1];
            while prev < prev_end && curr < curr_end {
                let run_a = self.runs[prev];
                let run_b = self.runs[curr];
                if runs_touch(&run_a, &run_b) {
                    self.dsu.union(run_a.label, run_b.label);
                }
                if run_a.end <= run_b.end {
                    prev += 1;
                } else {
                    curr += 1;
                }
            }
        }

        // Components are numbered in raster order of their first run.
        let mut compact = vec![u32::MAX; self.dsu.len()];
        let mut components: Vec<Component> = Vec::new();
        for run_index in 0..self.runs.len() {
            let run = self.runs[run_index];
            let root = self.dsu.find(run.label) as usize;
            if compact[root] == u32::MAX {
                compact[root] = components.len() as u32;
                components.push(Component::new(run.start, run.row));
            }
            let id = compact[root];
            let entry = &mut components[id as usize];
            let len = run.end - run.start;
            entry.area += len;
            entry.min_x = entry.min_x.min(run.start);
            entry.max_x = entry.max_x.max(run.end - 1);
            entry.min_y = entry.min_y.min(run.row);
            entry.max_y = entry.max_y.max(run.row);
            // Sum of x over [start, end).
            entry.sum_x += (run.start + run.end - 1) as f64 * len as f64 / 2.0;
            entry.sum_y += (run.row * len) as f64;
            let offset = run.row * width;
            self.labels[offset + run.start..offset + run.end].fill(id + 1);
        }
        components
    }
}

fn runs_touch(a: &RowRun, b: &RowRun) -> bool {
    a.start <= b.end && b.start <= a.end
}

#[derive(Default)]
struct DisjointSet {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn clear(&mut self) {
        self.parent.clear();
        self.rank.clear();
    }

    fn len(&self) -> usize {
        self.parent.len()
    }

    fn make_set(&mut self) -> u32 {
        let idx = self.parent.len() as u32;
        self.parent.push(idx);
        self.rank.push(0);
        idx
    }

    fn find(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut node = x;
        while self.parent[node as usize] != root {
            let next = self.parent[node as usize];
            self.parent[node as usize] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: u32, b: u32) {
        let mut root_a = self.find(a);
        let mut root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        let rank_a = self.rank[root_a as usize];
        let rank_b = self.rank[root_b as usize];
        if rank_a < rank_b {
            std::mem::swap(&mut root_a, &mut root_b);
        }
        self.parent[root_b as usize] = root_a;
        if rank_a == rank_b {
            self.rank[root_a as usize] = rank_a + 1;
        }
    }
}
