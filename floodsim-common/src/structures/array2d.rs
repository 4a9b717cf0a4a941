/////////////////////////////////////////////
// A generic 2-dimensional array structure //
/////////////////////////////////////////////

use std::io::Error;
use std::io::ErrorKind;
use std::ops::{AddAssign, Index, IndexMut, SubAssign};

/// A simple in-memory 2-D grid structure that is not connected to a file.
/// Cell values can contain any data type that implements Copy, AddAssign
/// and SubAssign.
///
/// Example:
///
/// ```
/// use floodsim_common::structures::Array2D;
/// let rows = 100;
/// let columns = 500;
/// let initial_value = 0f64;
/// let nodata_value = -999f64;
/// let mut x: Array2D<f64> = Array2D::new(rows, columns, initial_value, nodata_value).unwrap();
/// let cell_val = x.get_value(50, 100);
/// x.set_value(50, 100, 1f64);
/// ```
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Array2D<T: Copy + AddAssign + SubAssign> {
    pub columns: isize,
    pub rows: isize,
    data: Vec<T>,
    pub nodata: T,
}

impl<T> Array2D<T>
where
    T: Copy + AddAssign + SubAssign,
{
    /// The constructor function used to create a new Array2D object.
    pub fn new(
        rows: isize,
        columns: isize,
        initial_value: T,
        nodata: T,
    ) -> Result<Array2D<T>, Error> {
        if rows < 0 || columns < 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "Only non-negative rows and columns values accepted.",
            ));
        }
        let array = Array2D {
            columns,
            rows,
            nodata,
            data: vec![initial_value; (rows * columns) as usize],
        };
        Ok(array)
    }

    pub fn set_value(&mut self, row: isize, column: isize, value: T) {
        if column >= 0 && row >= 0 && column < self.columns && row < self.rows {
            self.data[(row * self.columns + column) as usize] = value;
        }
    }

    pub fn get_value(&self, row: isize, column: isize) -> T {
        if row < 0 || column < 0 || row >= self.rows || column >= self.columns {
            return self.nodata;
        }
        self.data[(row * self.columns + column) as usize]
    }

    pub fn increment(&mut self, row: isize, column: isize, value: T) {
        if column >= 0 && row >= 0 && column < self.columns && row < self.rows {
            self.data[(row * self.columns + column) as usize] += value;
        }
    }

    pub fn decrement(&mut self, row: isize, column: isize, value: T) {
        if column >= 0 && row >= 0 && column < self.columns && row < self.rows {
            self.data[(row * self.columns + column) as usize] -= value;
        }
    }

    pub fn set_row_data(&mut self, row: isize, values: Vec<T>) {
        for column in 0..values.len() as isize {
            if row >= 0 && column < self.columns && row < self.rows {
                self.data[(row * self.columns + column) as usize] = values[column as usize];
            }
        }
    }

    pub fn get_row_data(&self, row: isize) -> Vec<T> {
        let columns = self.columns as usize;
        let mut values: Vec<T> = vec![self.nodata; columns];
        if row >= 0 && row < self.rows {
            values.copy_from_slice(&self.data[row as usize * columns..row as usize * columns + columns]);
        }
        values
    }

    /// A raw, row-major view of the whole grid. Used by the row-striped
    /// worker-thread loops that need to read neighbouring rows directly.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn set_data_from_other(&mut self, other: &Array2D<T>) -> Result<(), Error> {
        if self.rows != other.rows || self.columns != other.columns {
            return Err(Error::new(
                ErrorKind::Other,
                "Grids must have the same dimensions.",
            ));
        }
        self.data = other.data.clone();
        Ok(())
    }

    pub fn duplicate(&self) -> Array2D<T> {
        Array2D {
            columns: self.columns,
            rows: self.rows,
            nodata: self.nodata,
            data: self.data.clone(),
        }
    }

    pub fn reinitialize_values(&mut self, value: T) {
        self.data = vec![value; (self.rows * self.columns) as usize];
    }

    pub fn columns(&self) -> isize {
        self.columns
    }

    pub fn rows(&self) -> isize {
        self.rows
    }

    pub fn nodata(&self) -> T {
        self.nodata
    }
}

impl<T: Copy> Index<(isize, isize)> for Array2D<T>
where
    T: Copy + AddAssign + SubAssign,
{
    type Output = T;

    fn index<'a>(&'a self, index: (isize, isize)) -> &'a T {
        let (row, column) = index;
        if column < 0 || row < 0 || column >= self.columns || row >= self.rows {
            return &self.nodata;
        }
        let idx = row * self.columns + column;
        &self.data[idx as usize]
    }
}

impl<T: Copy> IndexMut<(isize, isize)> for Array2D<T>
where
    T: Copy + AddAssign + SubAssign + PartialEq,
{
    fn index_mut<'a>(&'a mut self, index: (isize, isize)) -> &'a mut T {
        let (row, column) = index;
        if column < 0 || row < 0 || column >= self.columns || row >= self.rows {
            return &mut self.nodata;
        }
        let idx = row * self.columns + column;
        &mut self.data[idx as usize]
    }
}

#[cfg(test)]
mod test {
    use super::Array2D;

    #[test]
    fn test_new_rejects_negative_dims() {
        assert!(Array2D::<f64>::new(-1, 5, 0.0, -999.0).is_err());
    }

    #[test]
    fn test_get_set_value() {
        let mut a: Array2D<f64> = Array2D::new(4, 4, 0.0, -999.0).unwrap();
        a.set_value(2, 3, 7.5);
        assert_eq!(a.get_value(2, 3), 7.5);
        assert_eq!(a.get_value(0, 0), 0.0);
    }

    #[test]
    fn test_out_of_bounds_returns_nodata() {
        let a: Array2D<f64> = Array2D::new(4, 4, 0.0, -999.0).unwrap();
        assert_eq!(a.get_value(-1, 0), -999.0);
        assert_eq!(a.get_value(0, 4), -999.0);
        assert_eq!(a[(10, 10)], -999.0);
    }

    #[test]
    fn test_increment_decrement() {
        let mut a: Array2D<i32> = Array2D::new(2, 2, 0, -1).unwrap();
        a.increment(0, 0, 5);
        a.increment(0, 0, 2);
        a.decrement(0, 0, 1);
        assert_eq!(a.get_value(0, 0), 6);
    }

    #[test]
    fn test_row_data_roundtrip() {
        let mut a: Array2D<f64> = Array2D::new(3, 3, 0.0, -1.0).unwrap();
        a.set_row_data(1, vec![1.0, 2.0, 3.0]);
        assert_eq!(a.get_row_data(1), vec![1.0, 2.0, 3.0]);
    }
}
