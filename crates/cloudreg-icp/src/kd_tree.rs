use std::ops::Range;

use cloudreg_3d::{ops::squared_distance, pointcloud::PointCloud};

use crate::error::RegistrationError;

/// A node of a [`KdTree`].
///
/// A node covers a contiguous range of the tree's index permutation. Inner
/// nodes always have two non-empty children; leaves hold exactly one point.
#[derive(Debug, Clone)]
pub struct KdNode {
    range: Range<usize>,
    centroid: [f64; 3],
    min_bound: [f64; 3],
    max_bound: [f64; 3],
    axis: usize,
    children: Option<(usize, usize)>,
}

impl KdNode {
    /// The mean of the points under this node.
    pub fn centroid(&self) -> &[f64; 3] {
        &self.centroid
    }

    /// Lower corner of the axis aligned box around the node points.
    pub fn min_bound(&self) -> &[f64; 3] {
        &self.min_bound
    }

    /// Upper corner of the axis aligned box around the node points.
    pub fn max_bound(&self) -> &[f64; 3] {
        &self.max_bound
    }

    /// The axis used to split this node, or the next axis in the cycle for a leaf.
    pub fn axis(&self) -> usize {
        self.axis
    }

    /// Arena ids of the left and right children, if any.
    pub fn children(&self) -> Option<(usize, usize)> {
        self.children
    }

    /// Whether the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Number of points under this node.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// Whether the node holds no points.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    // squared distance from the query to the node box, zero inside
    fn box_distance(&self, query: &[f64; 3]) -> f64 {
        (0..3)
            .map(|k| {
                let d = (self.min_bound[k] - query[k])
                    .max(query[k] - self.max_bound[k])
                    .max(0.0);
                d * d
            })
            .sum()
    }
}

/// A spatial index over the points of a [`PointCloud`].
///
/// Nodes are split at their centroid, cycling the split axis x, y, z. Points
/// strictly below the centroid coordinate go left, the rest go right. When the
/// axis does not separate the points the next axes are tried, and coincident
/// points are halved by position.
///
/// The tree stores indices into the borrowed cloud, which cannot be mutated
/// while the tree is alive.
///
/// Example:
///
/// ```
/// use cloudreg_3d::pointcloud::PointCloud;
/// use cloudreg_icp::kd_tree::KdTree;
///
/// let pointcloud = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [5.0, 5.0, 5.0]]);
/// let tree = KdTree::build(&pointcloud).unwrap();
/// assert_eq!(tree.nearest(&[0.9, 0.1, 0.0]), Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct KdTree<'a> {
    pointcloud: &'a PointCloud,
    indices: Vec<usize>,
    nodes: Vec<KdNode>,
    depth: usize,
}

impl<'a> KdTree<'a> {
    /// Build the tree over all points of `pointcloud`.
    ///
    /// # Errors
    ///
    /// Fails on an empty cloud, on non-finite coordinates, or when the node
    /// storage cannot be allocated.
    pub fn build(pointcloud: &'a PointCloud) -> Result<Self, RegistrationError> {
        let points = pointcloud.points();
        if points.is_empty() {
            return Err(RegistrationError::EmptyPointCloud { role: "index" });
        }
        if points.iter().flatten().any(|v| !v.is_finite()) {
            return Err(RegistrationError::NonFiniteInput);
        }

        let mut indices = Vec::new();
        indices.try_reserve_exact(points.len())?;
        indices.extend(0..points.len());

        // a full binary tree with n leaves has 2n - 1 nodes
        let mut nodes = Vec::new();
        nodes.try_reserve_exact(2 * points.len() - 1)?;
        nodes.push(make_node(points, &indices, 0..points.len(), 0));

        let mut depth = 0;
        let mut stack = vec![(0usize, 0usize)];

        while let Some((id, node_depth)) = stack.pop() {
            depth = depth.max(node_depth);

            let (range, start_axis, centroid) = {
                let node = &nodes[id];
                (node.range.clone(), node.axis, node.centroid)
            };
            if range.len() <= 1 {
                continue;
            }

            let (axis, mid) =
                split_range(points, &mut indices[range.clone()], start_axis, &centroid);
            let mid = range.start + mid;
            nodes[id].axis = axis;

            let next_axis = (axis + 1) % 3;
            let left = nodes.len();
            nodes.push(make_node(points, &indices, range.start..mid, next_axis));
            let right = nodes.len();
            nodes.push(make_node(points, &indices, mid..range.end, next_axis));
            nodes[id].children = Some((left, right));

            stack.push((right, node_depth + 1));
            stack.push((left, node_depth + 1));
        }

        log::debug!(
            "built kd-tree over {} points: {} nodes, depth {}",
            points.len(),
            nodes.len(),
            depth
        );

        Ok(Self {
            pointcloud,
            indices,
            nodes,
            depth,
        })
    }

    /// The root node.
    pub fn root(&self) -> &KdNode {
        &self.nodes[0]
    }

    /// A node by its arena id.
    pub fn node(&self, id: usize) -> Option<&KdNode> {
        self.nodes.get(id)
    }

    /// The point indices under a node.
    pub fn node_indices(&self, node: &KdNode) -> &[usize] {
        &self.indices[node.range.clone()]
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the tree indexes no points.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of nodes in the arena.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Length of the longest root to leaf path, zero for a single leaf.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The point count of every leaf, in depth-first order.
    pub fn leaf_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut stack = vec![0];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            match node.children {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None => sizes.push(node.len()),
            }
        }
        sizes
    }

    /// A point of the indexed cloud.
    pub fn point(&self, index: usize) -> Option<&[f64; 3]> {
        self.pointcloud.get(index)
    }

    /// The indexed point cloud.
    pub fn pointcloud(&self) -> &'a PointCloud {
        self.pointcloud
    }

    /// Approximate nearest neighbor by greedy descent.
    ///
    /// At each inner node the query descends into the child whose centroid is
    /// closer, left on ties, without revisiting the other child. The result
    /// may not be the true nearest point; see [`KdTree::nearest_exact`].
    pub fn nearest(&self, query: &[f64; 3]) -> Option<usize> {
        let mut node = self.nodes.first()?;
        while let Some((left, right)) = node.children {
            let (left, right) = (&self.nodes[left], &self.nodes[right]);
            let dist_left = squared_distance(query, &left.centroid);
            let dist_right = squared_distance(query, &right.centroid);
            node = if dist_left <= dist_right { left } else { right };
        }
        self.indices.get(node.range.start).copied()
    }

    /// Exact nearest neighbor with backtracking pruned by node bounds.
    ///
    /// Among equidistant points the lowest index wins.
    pub fn nearest_exact(&self, query: &[f64; 3]) -> Option<usize> {
        let points = self.pointcloud.points();
        let mut best: Option<(f64, usize)> = None;
        let mut stack = vec![0];

        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if let Some((best_dist, _)) = best {
                if node.box_distance(query) > best_dist {
                    continue;
                }
            }

            match node.children {
                Some((left, right)) => {
                    let dist_left = self.nodes[left].box_distance(query);
                    let dist_right = self.nodes[right].box_distance(query);
                    // the closer child is popped first
                    if dist_left <= dist_right {
                        stack.push(right);
                        stack.push(left);
                    } else {
                        stack.push(left);
                        stack.push(right);
                    }
                }
                None => {
                    for &index in &self.indices[node.range.clone()] {
                        let dist = squared_distance(query, &points[index]);
                        let better = match best {
                            None => true,
                            Some((best_dist, best_index)) => {
                                dist < best_dist || (dist == best_dist && index < best_index)
                            }
                        };
                        if better {
                            best = Some((dist, index));
                        }
                    }
                }
            }
        }

        best.map(|(_, index)| index)
    }

    /// All point indices within `radius` of the query, inclusive, in ascending order.
    pub fn radius_search(&self, query: &[f64; 3], radius: f64) -> Vec<usize> {
        let points = self.pointcloud.points();
        let radius_sq = radius * radius;
        let mut found = Vec::new();
        if radius < 0.0 {
            return found;
        }

        let mut stack = vec![0];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.box_distance(query) > radius_sq {
                continue;
            }
            match node.children {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None => found.extend(
                    self.indices[node.range.clone()]
                        .iter()
                        .filter(|&&i| squared_distance(query, &points[i]) <= radius_sq),
                ),
            }
        }

        found.sort_unstable();
        found
    }
}

fn make_node(points: &[[f64; 3]], indices: &[usize], range: Range<usize>, axis: usize) -> KdNode {
    let mut sum = [0.0; 3];
    let mut min_bound = [f64::INFINITY; 3];
    let mut max_bound = [f64::NEG_INFINITY; 3];

    for &i in &indices[range.clone()] {
        let p = &points[i];
        for k in 0..3 {
            sum[k] += p[k];
            min_bound[k] = min_bound[k].min(p[k]);
            max_bound[k] = max_bound[k].max(p[k]);
        }
    }

    let n = range.len().max(1) as f64;
    KdNode {
        range,
        centroid: [sum[0] / n, sum[1] / n, sum[2] / n],
        min_bound,
        max_bound,
        axis,
        children: None,
    }
}

// Move the points below the centroid to the front of `indices`. Returns the
// axis that separated them and the size of the left part, which is always in
// `1..indices.len()`.
fn split_range(
    points: &[[f64; 3]],
    indices: &mut [usize],
    start_axis: usize,
    centroid: &[f64; 3],
) -> (usize, usize) {
    for k in 0..3 {
        let axis = (start_axis + k) % 3;
        let mid = partition_in_place(indices, |i| points[i][axis] < centroid[axis]);
        if mid > 0 && mid < indices.len() {
            return (axis, mid);
        }
    }
    // coincident points
    (start_axis, indices.len() / 2)
}

fn partition_in_place(indices: &mut [usize], is_left: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for j in 0..indices.len() {
        if is_left(indices[j]) {
            indices.swap(mid, j);
            mid += 1;
        }
    }
    mid
}
