//! Two-cluster k-means over RGB samples used to vote on background pixels.

const MAX_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MajorityVote {
    /// Sample whose color is closest to the centre of the larger cluster.
    pub representative: usize,
    pub cluster_size: usize,
}

fn distance_sq(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

fn to_f32(rgb: [u8; 3]) -> [f32; 3] {
    [rgb[0] as f32, rgb[1] as f32, rgb[2] as f32]
}

/// Splits `samples` into two clusters and returns the majority one.
///
/// Seeding is deterministic: the first sample and the sample farthest from it.
/// Equal-sized clusters resolve to the cluster holding sample 0.
pub fn majority_cluster(samples: &[[u8; 3]], assignment: &mut Vec<u8>) -> MajorityVote {
    assert!(!samples.is_empty(), "k-means needs at least one sample");
    assignment.clear();
    assignment.resize(samples.len(), 0);

    let points: Vec<[f32; 3]> = samples.iter().copied().map(to_f32).collect();
    let first = points[0];
    let mut farthest = 0usize;
    let mut farthest_distance = 0.0f32;
    for (index, point) in points.iter().enumerate() {
        let distance = distance_sq(first, *point);
        if distance > farthest_distance {
            farthest = index;
            farthest_distance = distance;
        }
    }
    if farthest_distance == 0.0 {
        return MajorityVote {
            representative: 0,
            cluster_size: samples.len(),
        };
    }

    let mut centers = [first, points[farthest]];
    for iteration in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (index, point) in points.iter().enumerate() {
            let cluster = u8::from(distance_sq(*point, centers[1]) < distance_sq(*point, centers[0]));
            if iteration == 0 || assignment[index] != cluster {
                changed = true;
            }
            assignment[index] = cluster;
        }
        if !changed {
            break;
        }
        for (cluster, center) in centers.iter_mut().enumerate() {
            let mut sum = [0.0f32; 3];
            let mut count = 0usize;
            for (point, assigned) in points.iter().zip(assignment.iter()) {
                if *assigned as usize == cluster {
                    sum[0] += point[0];
                    sum[1] += point[1];
                    sum[2] += point[2];
                    count += 1;
                }
            }
            if count > 0 {
                let n = count as f32;
                *center = [sum[0] / n, sum[1] / n, sum[2] / n];
            }
        }
    }

    let ones = assignment.iter().filter(|cluster| **cluster == 1).count();
    let zeros = samples.len() - ones;
    let majority = match zeros.cmp(&ones) {
        std::cmp::Ordering::Greater => 0u8,
        std::cmp::Ordering::Less => 1u8,
        std::cmp::Ordering::Equal => assignment[0],
    };
    let center = centers[majority as usize];
    let mut representative = usize::MAX;
    let mut best = f32::INFINITY;
    for (index, (point, assigned)) in points.iter().zip(assignment.iter()).enumerate() {
        if *assigned != majority {
            continue;
        }
        let distance = distance_sq(*point, center);
        if distance < best {
            best = distance;
            representative = index;
        }
    }
    MajorityVote {
        representative,
        cluster_size: if majority == 0 { zeros } else { ones },
    }
}
