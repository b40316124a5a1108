use std::sync::Arc;
use crate::index_space::{IndexSpace, IndexType, IntVect};




/**
 * An ordered collection of index spaces making up one grid level. The list
 * is shared behind an `Arc`, so clones are cheap and two arrays can be tested
 * for identity (not just equality) with `same_as`.
 */
#[derive(Clone, Debug)]
pub struct BoxArray {
    boxes: Arc<Vec<IndexSpace>>,
    itype: IndexType,
}




// ============================================================================
impl BoxArray {

    pub fn new(boxes: Vec<IndexSpace>) -> Self {
        let itype = boxes.first().map_or(IndexType::cell(), |b| b.index_type());
        assert!(
            boxes.iter().all(|b| b.index_type() == itype),
            "all boxes in a BoxArray must share an index type");
        Self { boxes: Arc::new(boxes), itype }
    }

    pub fn from_box(b: IndexSpace) -> Self {
        Self::new(vec![b])
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn get(&self, i: usize) -> &IndexSpace {
        &self.boxes[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexSpace> {
        self.boxes.iter()
    }

    pub fn index_type(&self) -> IndexType {
        self.itype
    }

    /**
     * Determine whether two arrays are the very same object, as opposed to
     * merely holding the same boxes.
     */
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.boxes, &other.boxes) && self.itype == other.itype
    }

    pub fn coarsen(&self, ratio: IntVect) -> Self {
        Self { boxes: Arc::new(self.boxes.iter().map(|b| b.coarsen(ratio)).collect()), itype: self.itype }
    }

    pub fn refine(&self, ratio: IntVect) -> Self {
        Self { boxes: Arc::new(self.boxes.iter().map(|b| b.refine(ratio)).collect()), itype: self.itype }
    }

    pub fn convert(&self, itype: IndexType) -> Self {
        Self { boxes: Arc::new(self.boxes.iter().map(|b| b.convert(itype)).collect()), itype }
    }

    pub fn coarsenable(&self, ratio: IntVect, min_width: i64, ndim: usize) -> bool {
        self.boxes.iter().all(|b| b.coarsenable(ratio, min_width, ndim))
    }

    /**
     * Chop every box so that no side is longer than `max_size` cells.
     */
    pub fn max_size(&self, max_size: IntVect) -> Self {
        let mut result = Vec::new();

        for b in self.boxes.iter() {
            let mut pieces = vec![b.clone()];

            for d in 0..3 {
                pieces = pieces
                    .into_iter()
                    .flat_map(|p| {
                        let len = p.hi()[d] - p.lo()[d] + 1;
                        let n = (len + max_size[d] - 1) / max_size[d];
                        let (lo, hi) = (p.lo(), p.hi());
                        (0..n.max(1)).map(move |m| {
                            let mut l = lo;
                            let mut h = hi;
                            l[d] = lo[d] + m * len / n.max(1);
                            h[d] = lo[d] + (m + 1) * len / n.max(1) - 1;
                            IndexSpace::with_type(l, h, p.index_type())
                        })
                        .collect::<Vec<_>>()
                    })
                    .collect();
            }
            result.extend(pieces);
        }
        Self::new(result)
    }

    pub fn minimal_box(&self) -> IndexSpace {
        let mut lo = [i64::MAX; 3];
        let mut hi = [i64::MIN; 3];

        for b in self.boxes.iter() {
            for d in 0..3 {
                lo[d] = lo[d].min(b.lo()[d]);
                hi[d] = hi[d].max(b.hi()[d]);
            }
        }
        if self.boxes.is_empty() {
            IndexSpace::empty()
        } else {
            IndexSpace::with_type(lo, hi, self.itype)
        }
    }

    /**
     * Return the (index, overlap) pairs of every box intersecting `region`.
     */
    pub fn intersections(&self, region: &IndexSpace) -> Vec<(usize, IndexSpace)> {
        self.boxes
            .iter()
            .enumerate()
            .map(|(i, b)| (i, b.intersect(region)))
            .filter(|(_, isect)| !isect.is_empty())
            .collect()
    }

    /**
     * Determine whether the index is inside one of the boxes.
     */
    pub fn contains(&self, index: IntVect) -> bool {
        self.boxes.iter().any(|b| b.contains(index))
    }
}

impl PartialEq for BoxArray {
    fn eq(&self, other: &Self) -> bool {
        self.itype == other.itype && self.boxes == other.boxes
    }
}




/**
 * Assignment of each box in a `BoxArray` to an owning rank.
 */
#[derive(Clone, Debug)]
pub struct DistributionMapping {
    owners: Arc<Vec<usize>>,
}




// ============================================================================
impl DistributionMapping {

    pub fn new(owners: Vec<usize>) -> Self {
        Self { owners: Arc::new(owners) }
    }

    /**
     * Deal the boxes of `ba` out to `nprocs` ranks round-robin.
     */
    pub fn round_robin(ba: &BoxArray, nprocs: usize) -> Self {
        Self::new((0..ba.len()).map(|i| i % nprocs.max(1)).collect())
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, i: usize) -> usize {
        self.owners[i]
    }

    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.owners, &other.owners)
    }
}

impl PartialEq for DistributionMapping {
    fn eq(&self, other: &Self) -> bool {
        self.owners == other.owners
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::index_space::IndexSpace;

    #[test]
    fn max_size_chops_into_equal_pieces() {
        let ba = BoxArray::from_box(IndexSpace::new([0, 0, 0], [63, 31, 0])).max_size([16, 16, 1]);
        assert_eq!(ba.len(), 8);
        assert_eq!(ba.iter().map(|b| b.num_pts()).sum::<usize>(), 64 * 32);
    }

    #[test]
    fn clones_are_identical_but_rebuilt_arrays_are_only_equal() {
        let ba = BoxArray::from_box(IndexSpace::new([0, 0, 0], [7, 7, 0]));
        let copy = ba.clone();
        let rebuilt = BoxArray::from_box(IndexSpace::new([0, 0, 0], [7, 7, 0]));
        assert!(ba.same_as(&copy));
        assert!(!ba.same_as(&rebuilt));
        assert_eq!(ba, rebuilt);
    }
}
