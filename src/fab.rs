use crate::index_space::{IndexSpace, IntVect};




/**
 * A fab ("Fortran array box") is a mapping from a rectangular index space to
 * field values with one or more components. The backing buffer is laid out
 * with the first index varying fastest and components outermost. The index
 * space of a fab normally includes its ghost zones.
 */
#[derive(Clone, Debug)]
pub struct Fab<T> {
    bx: IndexSpace,
    ncomp: usize,
    data: Vec<T>,
}




impl<T: Copy + Default> Fab<T> {




    pub fn new(bx: IndexSpace, ncomp: usize) -> Self {
        Self::filled(bx, ncomp, T::default())
    }




    pub fn filled(bx: IndexSpace, ncomp: usize, value: T) -> Self {
        let data = vec![value; bx.num_pts() * ncomp];
        Self { bx, ncomp, data }
    }




    /**
     * Generate a fab covering the given region, with values defined from a
     * closure of the index and component.
     */
    pub fn from_function<F>(bx: IndexSpace, ncomp: usize, f: F) -> Self
    where
        F: Fn(IntVect, usize) -> T
    {
        let mut fab = Self::new(bx.clone(), ncomp);
        for n in 0..ncomp {
            for iv in bx.iter() {
                fab.set(iv, n, f(iv, n));
            }
        }
        fab
    }




    pub fn index_space(&self) -> &IndexSpace {
        &self.bx
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }




    /**
     * Return the linear offset for the given index and component.
     */
    #[inline]
    pub fn offset(&self, iv: IntVect, n: usize) -> usize {
        self.validate_index(iv);
        let lo = self.bx.lo();
        let [nx, ny, nz] = self.bx.len();
        let i = (iv[0] - lo[0]) as usize;
        let j = (iv[1] - lo[1]) as usize;
        let k = (iv[2] - lo[2]) as usize;
        ((n * nz + k) * ny + j) * nx + i
    }

    #[inline]
    pub fn get(&self, iv: IntVect, n: usize) -> T {
        self.data[self.offset(iv, n)]
    }

    #[inline]
    pub fn set(&mut self, iv: IntVect, n: usize, value: T) {
        let m = self.offset(iv, n);
        self.data[m] = value;
    }




    pub fn array(&self) -> Array4<'_, T> {
        let [nx, ny, nz] = self.bx.len();
        Array4 {
            data: &self.data,
            begin: self.bx.lo(),
            len: [nx, ny, nz],
            ncomp: self.ncomp,
        }
    }

    pub fn array_mut(&mut self) -> Array4Mut<'_, T> {
        let [nx, ny, nz] = self.bx.len();
        Array4Mut {
            data: &mut self.data,
            begin: self.bx.lo(),
            len: [nx, ny, nz],
            ncomp: self.ncomp,
        }
    }




    /**
     * Set components `scomp .. scomp + ncomp` to `value` within `region`
     * (clipped to this fab).
     */
    pub fn set_val(&mut self, value: T, region: &IndexSpace, scomp: usize, ncomp: usize) {
        let region = self.bx.intersect(region);
        for n in scomp..scomp + ncomp {
            for iv in region.iter() {
                self.set(iv, n, value);
            }
        }
    }

    pub fn set_val_all(&mut self, value: T) {
        for x in self.data.iter_mut() {
            *x = value;
        }
    }




    /**
     * Copy data from `src` into this fab over the destination `region`. The
     * source index is the destination index minus `shift`, which lets the
     * caller copy from periodic images.
     */
    pub fn copy_from(&mut self, src: &Fab<T>, region: &IndexSpace, shift: IntVect, scomp: usize, dcomp: usize, ncomp: usize) {
        for n in 0..ncomp {
            for iv in region.iter() {
                let s = [iv[0] - shift[0], iv[1] - shift[1], iv[2] - shift[2]];
                self.set(iv, dcomp + n, src.get(s, scomp + n));
            }
        }
    }




    /**
     * Extract the data in `region` into a flat buffer, in the same order as
     * `IndexSpace::iter`, component by component.
     */
    pub fn gather(&self, region: &IndexSpace, scomp: usize, ncomp: usize) -> Vec<T> {
        let mut buffer = Vec::with_capacity(region.num_pts() * ncomp);
        for n in scomp..scomp + ncomp {
            for iv in region.iter() {
                buffer.push(self.get(iv, n));
            }
        }
        buffer
    }

    /**
     * Inverse of `gather`.
     */
    pub fn scatter(&mut self, region: &IndexSpace, dcomp: usize, ncomp: usize, buffer: &[T]) {
        let mut values = buffer.iter();
        for n in dcomp..dcomp + ncomp {
            for iv in region.iter() {
                if let Some(&v) = values.next() {
                    self.set(iv, n, v)
                }
            }
        }
    }

    fn validate_index(&self, iv: IntVect) {
        debug_assert!(
            self.bx.contains(iv),
            "index ({} {} {}) out of range on fab ({:?}..{:?})",
            iv[0], iv[1], iv[2], self.bx.lo(), self.bx.hi());
    }
}




/**
 * A read-only strided view of a fab. Views are cheap to copy and never own
 * memory; indexes are absolute (they include the fab's lower corner).
 */
#[derive(Clone, Copy)]
pub struct Array4<'a, T> {
    data: &'a [T],
    begin: IntVect,
    len: [usize; 3],
    ncomp: usize,
}

impl<'a, T: Copy> Array4<'a, T> {

    #[inline]
    fn offset(&self, i: i64, j: i64, k: i64, n: usize) -> usize {
        debug_assert!(self.contains(i, j, k) && n < self.ncomp, "Array4 index ({} {} {} {}) out of bounds", i, j, k, n);
        let a = (i - self.begin[0]) as usize;
        let b = (j - self.begin[1]) as usize;
        let c = (k - self.begin[2]) as usize;
        ((n * self.len[2] + c) * self.len[1] + b) * self.len[0] + a
    }

    #[inline]
    pub fn get(&self, i: i64, j: i64, k: i64, n: usize) -> T {
        self.data[self.offset(i, j, k, n)]
    }

    #[inline]
    pub fn at(&self, iv: IntVect, n: usize) -> T {
        self.get(iv[0], iv[1], iv[2], n)
    }

    #[inline]
    pub fn contains(&self, i: i64, j: i64, k: i64) -> bool {
        let p = [i, j, k];
        (0..3).all(|d| p[d] >= self.begin[d] && p[d] < self.begin[d] + self.len[d] as i64)
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }
}




/**
 * A mutable strided view of a fab.
 */
pub struct Array4Mut<'a, T> {
    data: &'a mut [T],
    begin: IntVect,
    len: [usize; 3],
    ncomp: usize,
}

impl<'a, T: Copy> Array4Mut<'a, T> {

    #[inline]
    fn offset(&self, i: i64, j: i64, k: i64, n: usize) -> usize {
        debug_assert!(self.contains(i, j, k) && n < self.ncomp, "Array4 index ({} {} {} {}) out of bounds", i, j, k, n);
        let a = (i - self.begin[0]) as usize;
        let b = (j - self.begin[1]) as usize;
        let c = (k - self.begin[2]) as usize;
        ((n * self.len[2] + c) * self.len[1] + b) * self.len[0] + a
    }

    #[inline]
    pub fn get(&self, i: i64, j: i64, k: i64, n: usize) -> T {
        self.data[self.offset(i, j, k, n)]
    }

    #[inline]
    pub fn at(&self, iv: IntVect, n: usize) -> T {
        self.get(iv[0], iv[1], iv[2], n)
    }

    #[inline]
    pub fn set(&mut self, i: i64, j: i64, k: i64, n: usize, value: T) {
        let m = self.offset(i, j, k, n);
        self.data[m] = value;
    }

    #[inline]
    pub fn set_at(&mut self, iv: IntVect, n: usize, value: T) {
        self.set(iv[0], iv[1], iv[2], n, value)
    }

    #[inline]
    pub fn contains(&self, i: i64, j: i64, k: i64) -> bool {
        let p = [i, j, k];
        (0..3).all(|d| p[d] >= self.begin[d] && p[d] < self.begin[d] + self.len[d] as i64)
    }

    /**
     * Reborrow as a read-only view.
     */
    pub fn as_const(&self) -> Array4<'_, T> {
        Array4 { data: self.data, begin: self.begin, len: self.len, ncomp: self.ncomp }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::Fab;
    use crate::index_space::IndexSpace;

    #[test]
    fn fab_indexing_works() {
        let fab = Fab::from_function(IndexSpace::new([4, 4, 0], [9, 9, 0]), 2, |iv, n| (iv[0] + iv[1]) as f64 + 100.0 * n as f64);
        assert_eq!(fab.get([5, 5, 0], 0), 10.0);
        assert_eq!(fab.get([6, 8, 0], 1), 114.0);
        assert_eq!(fab.array().get(6, 8, 0, 1), 114.0);
    }

    #[test]
    fn gather_and_scatter_are_inverse() {
        let region = IndexSpace::new([5, 5, 0], [7, 6, 0]);
        let src = Fab::from_function(IndexSpace::new([4, 4, 0], [9, 9, 0]), 1, |iv, _| iv[0] as f64 * 10.0 + iv[1] as f64);
        let mut dst = Fab::<f64>::new(IndexSpace::new([0, 0, 0], [9, 9, 0]), 1);
        dst.scatter(&region, 0, 1, &src.gather(&region, 0, 1));
        assert_eq!(dst.get([7, 6, 0], 0), 76.0);
        assert_eq!(dst.get([4, 4, 0], 0), 0.0);
    }
}
