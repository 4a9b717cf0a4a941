//! Direction graph builder.
//!
//! Row-threaded in the same shape as `d8_pointer.rs`'s flow-pointer
//! computation: a fixed pool of workers stride over rows
//! (`row % num_procs == tid`) and post finished rows back over an
//! `mpsc::channel`. Here each worker decodes a D8 code into a downstream
//! offset instead of computing a steepest-descent slope.

use floodsim_common::configs::D8Encoding;
use floodsim_common::error::config_error;
use floodsim_common::structures::Array2D;
use std::io::Error;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// ESRI D8 code mapping: 1=E,2=SE,4=S,8=SW,16=W,32=NW,64=N,128=NE.
const ESRI_CODES: [i32; 8] = [1, 2, 4, 8, 16, 32, 64, 128];
/// Clockwise 0..7 encoding: 0=E,1=SE,2=S,3=SW,4=W,5=NW,6=N,7=NE.
const CW0_7_CODES: [i32; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
/// Row/column offsets shared by both encodings, indexed the same way as
/// the code tables above.
const D_ROW: [i32; 8] = [0, 1, 1, 1, 0, -1, -1, -1];
const D_COL: [i32; 8] = [1, 1, 0, -1, -1, -1, 0, 1];

fn code_table(encoding: D8Encoding) -> [i32; 8] {
    match encoding {
        D8Encoding::Esri => ESRI_CODES,
        D8Encoding::Cw0_7 => CW0_7_CODES,
    }
}

/// Derived direction index: `has_down`, `down_row`, `down_col`. A cell
/// with `has_down[r,c] == false` is terminal.
pub struct DirectionGraph {
    pub rows: isize,
    pub cols: isize,
    /// `0`/`1` flags rather than `bool` -- `bool` has no `AddAssign`, so
    /// it can't satisfy `Array2D`'s bound, the same reason flag grids
    /// like `num_inflowing` in `d8_flow_accum.rs` use `i8` instead of
    /// `bool`.
    pub has_down: Array2D<i8>,
    pub down_row: Array2D<i32>,
    pub down_col: Array2D<i32>,
}

impl DirectionGraph {
    /// Builds the direction graph from a raw D8 raster, decoded according
    /// to `encoding`. Unknown codes and out-of-bounds neighbors both
    /// leave the cell terminal. When `verbose`, reports percentage
    /// progress over rows collected back from the worker pool, the same
    /// `"{} {}%"` dedup-on-change style `d8_pointer.rs` uses.
    pub fn build(
        direction: &Array2D<i32>,
        encoding_tag: &str,
        num_threads: usize,
        verbose: bool,
    ) -> Result<DirectionGraph, Error> {
        let encoding = D8Encoding::parse(encoding_tag)?;
        let rows = direction.rows();
        let cols = direction.columns();
        let codes = code_table(encoding);

        let mut has_down: Array2D<i8> = Array2D::new(rows, cols, 0, 0)
            .map_err(|e| config_error(e.to_string()))?;
        let mut down_row: Array2D<i32> =
            Array2D::new(rows, cols, -1, -1).map_err(|e| config_error(e.to_string()))?;
        let mut down_col: Array2D<i32> =
            Array2D::new(rows, cols, -1, -1).map_err(|e| config_error(e.to_string()))?;

        let direction = Arc::new(direction.duplicate());
        let num_procs = num_threads.max(1) as isize;
        let (tx, rx) = mpsc::channel();
        for tid in 0..num_procs {
            let direction = direction.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                for row in (0..rows).filter(|r| r % num_procs == tid) {
                    let mut row_has_down = vec![0i8; cols as usize];
                    let mut row_down_row = vec![-1i32; cols as usize];
                    let mut row_down_col = vec![-1i32; cols as usize];
                    for col in 0..cols {
                        let code = direction.get_value(row, col);
                        if let Some(dir) = codes.iter().position(|c| *c == code) {
                            let r2 = row + D_ROW[dir] as isize;
                            let c2 = col + D_COL[dir] as isize;
                            if r2 >= 0 && r2 < rows && c2 >= 0 && c2 < cols {
                                row_has_down[col as usize] = 1;
                                row_down_row[col as usize] = r2 as i32;
                                row_down_col[col as usize] = c2 as i32;
                            }
                        }
                    }
                    tx.send((row, row_has_down, row_down_row, row_down_col))
                        .expect("direction graph worker channel closed early");
                }
            });
        }
        drop(tx);
        let mut progress: usize;
        let mut old_progress: usize = 1;
        for (row, rhd, rdr, rdc) in rx {
            has_down.set_row_data(row, rhd);
            down_row.set_row_data(row, rdr);
            down_col.set_row_data(row, rdc);

            if verbose && rows > 1 {
                progress = (100.0_f64 * row as f64 / (rows - 1) as f64) as usize;
                if progress != old_progress {
                    println!("Direction graph: {}%", progress);
                    old_progress = progress;
                }
            }
        }

        Ok(DirectionGraph {
            rows,
            cols,
            has_down,
            down_row,
            down_col,
        })
    }

    pub fn is_terminal(&self, row: isize, col: isize) -> bool {
        self.has_down.get_value(row, col) == 0
    }

    /// Optional pre-flight acyclicity check.
    /// Returns one offending cycle's cells if the graph is not a DAG.
    pub fn find_cycle(&self, active: &Array2D<i8>) -> Option<Vec<(isize, isize)>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }
        let mut mark = vec![Mark::Unvisited; (self.rows * self.cols) as usize];
        let idx = |r: isize, c: isize| (r * self.cols + c) as usize;

        for start_r in 0..self.rows {
            for start_c in 0..self.cols {
                if active.get_value(start_r, start_c) == 0 || mark[idx(start_r, start_c)] != Mark::Unvisited {
                    continue;
                }
                let mut path: Vec<(isize, isize)> = Vec::new();
                let mut cur = (start_r, start_c);
                loop {
                    let cidx = idx(cur.0, cur.1);
                    match mark[cidx] {
                        Mark::Done => break,
                        Mark::InStack => {
                            let start_pos = path.iter().position(|p| *p == cur).unwrap_or(0);
                            return Some(path[start_pos..].to_vec());
                        }
                        Mark::Unvisited => {
                            mark[cidx] = Mark::InStack;
                            path.push(cur);
                            if self.has_down.get_value(cur.0, cur.1) == 0 {
                                break;
                            }
                            let nxt = (
                                self.down_row.get_value(cur.0, cur.1) as isize,
                                self.down_col.get_value(cur.0, cur.1) as isize,
                            );
                            if active.get_value(nxt.0, nxt.1) == 0 {
                                break;
                            }
                            cur = nxt;
                        }
                    }
                }
                for (r, c) in path {
                    mark[idx(r, c)] = Mark::Done;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn esri_line_east() -> Array2D<i32> {
        // 1x4 row draining east: codes 1,1,1,<terminal>
        let mut g: Array2D<i32> = Array2D::new(1, 4, 1, -1).unwrap();
        g.set_value(0, 3, 0); // unmapped code -> terminal
        g
    }

    #[test]
    fn unknown_encoding_is_config_error() {
        let g = esri_line_east();
        assert!(DirectionGraph::build(&g, "bogus", 1, false).is_err());
    }

    #[test]
    fn east_chain_has_correct_downstream() {
        let g = esri_line_east();
        let dg = DirectionGraph::build(&g, "esri", 2, false).unwrap();
        assert_eq!(dg.has_down.get_value(0, 0), 1);
        assert_eq!(dg.down_col.get_value(0, 0), 1);
        assert!(dg.is_terminal(0, 3));
    }

    #[test]
    fn out_of_bounds_neighbor_is_terminal() {
        // single cell pointing east with no right-hand neighbor
        let g: Array2D<i32> = Array2D::new(1, 1, 1, -1).unwrap();
        let dg = DirectionGraph::build(&g, "esri", 1, false).unwrap();
        assert!(dg.is_terminal(0, 0));
    }

    #[test]
    fn detects_cycle() {
        // 2x1 grid: row0 points south (4), row1 points north (64) -> cycle
        let mut g: Array2D<i32> = Array2D::new(2, 1, 0, -1).unwrap();
        g.set_value(0, 0, 4);
        g.set_value(1, 0, 64);
        let dg = DirectionGraph::build(&g, "esri", 1, false).unwrap();
        let active: Array2D<i8> = Array2D::new(2, 1, 1, 0).unwrap();
        assert!(dg.find_cycle(&active).is_some());
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let g = esri_line_east();
        let dg = DirectionGraph::build(&g, "esri", 1, false).unwrap();
        let active: Array2D<i8> = Array2D::new(1, 4, 1, 0).unwrap();
        assert!(dg.find_cycle(&active).is_none());
    }
}
