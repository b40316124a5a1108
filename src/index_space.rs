use serde::{Deserialize, Serialize};




/// A point in the three-dimensional integer index space. Problems of lower
/// dimension leave the trailing components at zero.
pub type IntVect = [i64; 3];




/**
 * Identifier for a Cartesian axis
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    I,
    J,
    K,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::I => 0,
            Axis::J => 1,
            Axis::K => 2,
        }
    }

    pub fn from_index(dir: usize) -> Self {
        match dir {
            0 => Axis::I,
            1 => Axis::J,
            _ => Axis::K,
        }
    }
}




/// Return the unit vector along the given direction.
pub fn unit(dir: usize) -> IntVect {
    let mut e = [0; 3];
    e[dir] = 1;
    e
}

/// Return a vector with `value` in the first `ndim` components and zero
/// elsewhere.
pub fn splat(value: i64, ndim: usize) -> IntVect {
    let mut v = [0; 3];
    for x in v.iter_mut().take(ndim) {
        *x = value;
    }
    v
}

pub fn add(a: IntVect, b: IntVect) -> IntVect {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn sub(a: IntVect, b: IntVect) -> IntVect {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Floor division of an index by a (positive) coarsening ratio.
pub fn coarsen_index(i: i64, ratio: i64) -> i64 {
    i.div_euclid(ratio)
}

pub fn coarsen_iv(iv: IntVect, ratio: IntVect) -> IntVect {
    [
        coarsen_index(iv[0], ratio[0]),
        coarsen_index(iv[1], ratio[1]),
        coarsen_index(iv[2], ratio[2]),
    ]
}




/**
 * Centering of data along one axis
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Centering {
    Cell,
    Node,
}




/**
 * Per-axis centering of an index space: all-cell for cell-centered data,
 * all-node for node-centered data, and node along one axis for face data.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexType(pub [Centering; 3]);

impl IndexType {
    pub fn cell() -> Self {
        Self([Centering::Cell; 3])
    }

    pub fn node() -> Self {
        Self([Centering::Node; 3])
    }

    /**
     * Node-centered along the first `ndim` axes only. Inactive axes stay
     * cell-centered, so they keep a single index.
     */
    pub fn nodal(ndim: usize) -> Self {
        let mut c = [Centering::Cell; 3];
        for x in c.iter_mut().take(ndim) {
            *x = Centering::Node;
        }
        Self(c)
    }

    pub fn face(dir: usize) -> Self {
        let mut c = [Centering::Cell; 3];
        c[dir] = Centering::Node;
        Self(c)
    }

    pub fn is_node(&self, dir: usize) -> bool {
        self.0[dir] == Centering::Node
    }

    pub fn is_cell_centered(&self) -> bool {
        self.0.iter().all(|c| *c == Centering::Cell)
    }

    pub fn is_node_centered(&self) -> bool {
        self.0.iter().all(|c| *c == Centering::Node)
    }
}

impl Default for IndexType {
    fn default() -> Self {
        Self::cell()
    }
}




/**
 * Which side of a box a face is on
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Low,
    High,
}




/**
 * A face orientation: a direction together with a side. For a problem of
 * dimension `ndim` the `2 * ndim` orientations are enumerated with all the
 * low faces first, then all the high faces.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Orientation {
    pub dir: usize,
    pub side: Side,
}

impl Orientation {
    pub fn new(dir: usize, side: Side) -> Self {
        Self { dir, side }
    }

    pub fn index(&self, ndim: usize) -> usize {
        match self.side {
            Side::Low => self.dir,
            Side::High => self.dir + ndim,
        }
    }

    pub fn from_index(face: usize, ndim: usize) -> Self {
        if face < ndim {
            Self::new(face, Side::Low)
        } else {
            Self::new(face - ndim, Side::High)
        }
    }

    pub fn is_low(&self) -> bool {
        self.side == Side::Low
    }

    /// Outward normal sign: -1 for low faces, +1 for high faces.
    pub fn sign(&self) -> i64 {
        if self.is_low() { -1 } else { 1 }
    }

    pub fn flip(&self) -> Self {
        match self.side {
            Side::Low => Self::new(self.dir, Side::High),
            Side::High => Self::new(self.dir, Side::Low),
        }
    }

    pub fn all(ndim: usize) -> impl Iterator<Item = Orientation> {
        (0..2 * ndim).map(move |f| Self::from_index(f, ndim))
    }
}




#[derive(Clone, Debug, PartialEq, Eq, Hash)]

/**
 * Represents a rectangular region in a discrete index space. Bounds are
 * inclusive, and an empty region has `hi[d] == lo[d] - 1` on some axis.
 */
pub struct IndexSpace {
    lo: IntVect,
    hi: IntVect,
    itype: IndexType,
}




/**
 * Describes a rectangular index space. The index type is signed 64-bit integer.
 */
impl IndexSpace {


    pub fn new(lo: IntVect, hi: IntVect) -> Self {
        Self::with_type(lo, hi, IndexType::cell())
    }


    pub fn with_type(lo: IntVect, hi: IntVect, itype: IndexType) -> Self {

        assert!(
            (0..3).all(|d| lo[d] <= hi[d] + 1),
            "index space has negative volume");

        Self { lo, hi, itype }
    }


    /**
     * Return an empty index space.
     */
    pub fn empty() -> Self {
        Self { lo: [0; 3], hi: [-1; 3], itype: IndexType::cell() }
    }


    pub fn lo(&self) -> IntVect {
        self.lo
    }


    pub fn hi(&self) -> IntVect {
        self.hi
    }


    pub fn index_type(&self) -> IndexType {
        self.itype
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn len(&self) -> [usize; 3] {
        [
            (self.hi[0] - self.lo[0] + 1).max(0) as usize,
            (self.hi[1] - self.lo[1] + 1).max(0) as usize,
            (self.hi[2] - self.lo[2] + 1).max(0) as usize,
        ]
    }


    /**
     * Return the number of elements in this index space.
     */
    pub fn num_pts(&self) -> usize {
        let [l, m, n] = self.len();
        l * m * n
    }


    pub fn is_empty(&self) -> bool {
        (0..3).any(|d| self.hi[d] < self.lo[d])
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: IntVect) -> bool {
        (0..3).all(|d| index[d] >= self.lo[d] && index[d] <= self.hi[d])
    }


    /**
     * Determine whether another index space is a subset of this one.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        other.is_empty() || (0..3).all(|d| other.lo[d] >= self.lo[d] && other.hi[d] <= self.hi[d])
    }


    /**
     * Return the intersection of two index spaces, which may be empty. The
     * result has the index type of `self`.
     */
    pub fn intersect(&self, other: &Self) -> Self {
        let mut lo = [0; 3];
        let mut hi = [0; 3];

        for d in 0..3 {
            lo[d] = self.lo[d].max(other.lo[d]);
            hi[d] = self.hi[d].min(other.hi[d]);
            if hi[d] < lo[d] {
                return Self { lo: self.lo, hi: sub(self.lo, [1; 3]), itype: self.itype };
            }
        }
        Self { lo, hi, itype: self.itype }
    }


    pub fn intersects(&self, other: &Self) -> bool {
        !self.intersect(other).is_empty()
    }


    /**
     * Expand this index space by the given number of elements on each axis.
     */
    pub fn grow(&self, n: IntVect) -> Self {
        Self::with_type(sub(self.lo, n), add(self.hi, n), self.itype)
    }


    pub fn grow_dir(&self, dir: usize, n: i64) -> Self {
        self.grow(scaled(unit(dir), n))
    }


    pub fn grow_lo(&self, dir: usize, n: i64) -> Self {
        let mut lo = self.lo;
        lo[dir] -= n;
        Self::with_type(lo, self.hi, self.itype)
    }


    pub fn grow_hi(&self, dir: usize, n: i64) -> Self {
        let mut hi = self.hi;
        hi[dir] += n;
        Self::with_type(self.lo, hi, self.itype)
    }


    pub fn shift(&self, s: IntVect) -> Self {
        Self { lo: add(self.lo, s), hi: add(self.hi, s), itype: self.itype }
    }


    /**
     * Coarsen by the given ratio. Cell-centered axes use floor division on
     * both ends; node-centered axes round the upper end up so the coarse
     * region still spans the fine one.
     */
    pub fn coarsen(&self, ratio: IntVect) -> Self {
        let mut lo = [0; 3];
        let mut hi = [0; 3];

        for d in 0..3 {
            lo[d] = coarsen_index(self.lo[d], ratio[d]);
            hi[d] = coarsen_index(self.hi[d], ratio[d]);
            if self.itype.is_node(d) && self.hi[d].rem_euclid(ratio[d]) != 0 {
                hi[d] += 1;
            }
        }
        Self { lo, hi, itype: self.itype }
    }


    /**
     * Increase the resolution of this index space by the given ratio.
     */
    pub fn refine(&self, ratio: IntVect) -> Self {
        let mut lo = [0; 3];
        let mut hi = [0; 3];

        for d in 0..3 {
            lo[d] = self.lo[d] * ratio[d];
            hi[d] = if self.itype.is_node(d) {
                self.hi[d] * ratio[d]
            } else {
                (self.hi[d] + 1) * ratio[d] - 1
            };
        }
        Self { lo, hi, itype: self.itype }
    }


    /**
     * Determine whether coarsening by `ratio` is exact and leaves at least
     * `min_width` cells along each of the first `ndim` axes.
     */
    pub fn coarsenable(&self, ratio: IntVect, min_width: i64, ndim: usize) -> bool {
        let cells = self.enclosed_cells().coarsen(ratio);
        self.coarsen(ratio).refine(ratio) == *self
            && (0..ndim).all(|d| cells.hi[d] - cells.lo[d] + 1 >= min_width)
    }


    /**
     * Change the centering along each axis, keeping the cells spanned.
     */
    pub fn convert(&self, itype: IndexType) -> Self {
        let mut hi = self.hi;

        for d in 0..3 {
            match (self.itype.is_node(d), itype.is_node(d)) {
                (false, true) => hi[d] += 1,
                (true, false) => hi[d] -= 1,
                _ => {}
            }
        }
        Self { lo: self.lo, hi, itype }
    }


    pub fn surrounding_nodes(&self) -> Self {
        self.convert(IndexType::node())
    }


    pub fn enclosed_cells(&self) -> Self {
        self.convert(IndexType::cell())
    }


    /**
     * The layer of cells just outside the given face, with thickness `n`.
     */
    pub fn adj_cell(&self, face: Orientation, n: i64) -> Self {
        let d = face.dir;
        let mut lo = self.lo;
        let mut hi = self.hi;

        if face.is_low() {
            hi[d] = self.lo[d] - 1;
            lo[d] = self.lo[d] - n;
        } else {
            lo[d] = self.hi[d] + 1;
            hi[d] = self.hi[d] + n;
        }
        Self { lo, hi, itype: self.itype }
    }


    pub fn adj_cell_lo(&self, dir: usize, n: i64) -> Self {
        self.adj_cell(Orientation::new(dir, Side::Low), n)
    }


    pub fn adj_cell_hi(&self, dir: usize, n: i64) -> Self {
        self.adj_cell(Orientation::new(dir, Side::High), n)
    }


    /**
     * The layer of cells just inside the given face, with thickness `n`.
     */
    pub fn bndry_cell(&self, face: Orientation, n: i64) -> Self {
        self.adj_cell(face, n).shift(scaled(unit(face.dir), -face.sign() * n))
    }


    /**
     * Return the parts of `self` not covered by `other`, as a list of
     * disjoint index spaces.
     */
    pub fn difference(&self, other: &Self) -> Vec<Self> {
        let isect = self.intersect(other);

        if isect.is_empty() {
            return vec![self.clone()];
        }
        let mut result = Vec::new();
        let mut rest = self.clone();

        for d in 0..3 {
            if rest.lo[d] < isect.lo[d] {
                let mut piece = rest.clone();
                piece.hi[d] = isect.lo[d] - 1;
                result.push(piece);
                rest.lo[d] = isect.lo[d];
            }
            if rest.hi[d] > isect.hi[d] {
                let mut piece = rest.clone();
                piece.lo[d] = isect.hi[d] + 1;
                result.push(piece);
                rest.hi[d] = isect.hi[d];
            }
        }
        result
    }


    /**
     * Return an iterator which traverses the index space in column-major
     * order (the first index increases fastest), matching the memory layout
     * of `Fab`.
     */
    pub fn iter(&self) -> impl Iterator<Item = IntVect> + '_ {
        let (lo, hi) = (self.lo, self.hi);
        let empty = self.is_empty();
        (lo[2]..=hi[2])
            .flat_map(move |k| (lo[1]..=hi[1]).flat_map(move |j| (lo[0]..=hi[0]).map(move |i| [i, j, k])))
            .filter(move |_| !empty)
    }
}




pub fn scaled(v: IntVect, s: i64) -> IntVect {
    [v[0] * s, v[1] * s, v[2] * s]
}




/**
 * Less imposing factory function to construct a cell-centered index space
 * from the extents of the first `ndim` axes.
 */
pub fn range3d(lo: IntVect, hi: IntVect) -> IndexSpace {
    IndexSpace::new(lo, hi)
}




/**
 * Cell-centered box covering `n` cells from the origin on the first `ndim`
 * axes and a single cell on the remaining ones.
 */
pub fn domain_box(n: [i64; 3], ndim: usize) -> IndexSpace {
    let mut hi = [0; 3];
    for d in 0..3 {
        hi[d] = if d < ndim { n[d] - 1 } else { 0 };
    }
    IndexSpace::new([0; 3], hi)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn coarsen_and_refine_cell_boxes() {
        let b = IndexSpace::new([-3, 0, 0], [4, 7, 0]);
        let c = b.coarsen([2, 2, 1]);
        assert_eq!(c.lo(), [-2, 0, 0]);
        assert_eq!(c.hi(), [2, 3, 0]);
        assert_eq!(c.refine([2, 2, 1]), IndexSpace::new([-4, 0, 0], [5, 7, 0]));
    }

    #[test]
    fn coarsen_node_box_rounds_up() {
        let b = IndexSpace::with_type([0, 0, 0], [5, 4, 0], IndexType::node());
        let c = b.coarsen([2, 2, 1]);
        assert_eq!(c.hi(), [3, 2, 0]);
    }

    #[test]
    fn difference_covers_remainder() {
        let a = IndexSpace::new([0, 0, 0], [9, 9, 0]);
        let b = IndexSpace::new([2, 3, 0], [5, 12, 0]);
        let pieces = a.difference(&b);
        let total: usize = pieces.iter().map(|p| p.num_pts()).sum();
        assert_eq!(total, 100 - 4 * 7);
        assert!(pieces.iter().all(|p| !p.intersects(&b)));
    }

    #[test]
    fn adjacent_layers_are_outside() {
        let b = IndexSpace::new([0, 0, 0], [3, 3, 0]);
        let f = Orientation::new(0, Side::High);
        assert_eq!(b.adj_cell(f, 1), IndexSpace::new([4, 0, 0], [4, 3, 0]));
        assert_eq!(b.bndry_cell(f, 1), IndexSpace::new([3, 0, 0], [3, 3, 0]));
    }

    #[test]
    fn orientation_enumeration_puts_low_faces_first() {
        let faces: Vec<_> = Orientation::all(2).collect();
        assert_eq!(faces[1], Orientation::new(1, Side::Low));
        assert_eq!(faces[2], Orientation::new(0, Side::High));
        assert_eq!(faces[3].index(2), 3);
    }

    #[test]
    fn traversal_has_correct_length() {
        let b = IndexSpace::new([0, 0, 0], [4, 2, 1]);
        assert_eq!(b.iter().count(), 30);
        assert_eq!(IndexSpace::empty().iter().count(), 0);
    }
}
