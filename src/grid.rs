use crate::error::Error;

/**
 * One of the four compass-direction faces of a structured grid cell.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Face {
    Left,
    Bottom,
    Right,
    Top,
}

// ============================================================================
impl Face {
    pub const ALL: [Face; 4] = [Face::Left, Face::Bottom, Face::Right, Face::Top];

    /// Outward unit normal of this face.
    pub fn normal(self) -> (f64, f64) {
        match self {
            Face::Left => (-1.0, 0.0),
            Face::Bottom => (0.0, -1.0),
            Face::Right => (1.0, 0.0),
            Face::Top => (0.0, 1.0),
        }
    }
}

/**
 * A fixed structured 2D grid of `nx * ny` rectangular cells covering a
 * `width * height` physical domain. Cells are numbered row-major,
 * `i = y * nx + x`. The grid is immutable after creation; a cell at a
 * domain edge maps its missing neighbor to itself, which realizes a
 * reflective boundary by construction rather than as a special case in
 * the flux code.
 */
#[derive(Clone, Debug)]
pub struct Grid {
    nx: usize,
    ny: usize,
    width: f64,
    height: f64,
    dx: f64,
    dy: f64,
}

// ============================================================================
impl Grid {
    pub fn new(nx: usize, ny: usize, width: f64, height: f64) -> Result<Self, Error> {
        if nx == 0 || ny == 0 {
            return Err(Error::Misconfiguration(format!(
                "grid must have at least one cell per axis, got {}x{}",
                nx, ny
            )));
        }
        if !(width.is_finite() && width > 0.0 && height.is_finite() && height > 0.0) {
            return Err(Error::Misconfiguration(format!(
                "grid extent must be finite and positive, got {}x{}",
                width, height
            )));
        }
        Ok(Self {
            nx,
            ny,
            width,
            height,
            dx: width / nx as f64,
            dy: height / ny as f64,
        })
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn dx(&self) -> f64 {
        self.dx
    }

    pub fn dy(&self) -> f64 {
        self.dy
    }

    pub fn cell_count(&self) -> usize {
        self.nx * self.ny
    }

    pub fn cell_area(&self) -> f64 {
        self.dx * self.dy
    }

    /// All cells of this grid have four faces.
    pub fn edge_count(&self, _cell: usize) -> usize {
        4
    }

    /// Physical length of one face of a cell: vertical faces measure `dy`,
    /// horizontal faces measure `dx`.
    pub fn edge_length(&self, _cell: usize, face: Face) -> f64 {
        match face {
            Face::Left | Face::Right => self.dy,
            Face::Bottom | Face::Top => self.dx,
        }
    }

    pub fn edge_normal(&self, _cell: usize, face: Face) -> (f64, f64) {
        face.normal()
    }

    /// The shortest face length over all cells.
    pub fn min_edge_length(&self) -> f64 {
        self.dx.min(self.dy)
    }

    /// Decompose a row-major cell index into `(x, y)` coordinates.
    pub fn cell_position(&self, cell: usize) -> (usize, usize) {
        (cell % self.nx, cell / self.nx)
    }

    /// The index of the cell adjacent to `cell` across `face`. Boundary
    /// cells map a missing neighbor to themselves.
    pub fn neighbor_cell(&self, cell: usize, face: Face) -> usize {
        let (x, y) = self.cell_position(cell);
        match face {
            Face::Left => {
                if x == 0 {
                    cell
                } else {
                    cell - 1
                }
            }
            Face::Bottom => {
                if y == 0 {
                    cell
                } else {
                    cell - self.nx
                }
            }
            Face::Right => {
                if x == self.nx - 1 {
                    cell
                } else {
                    cell + 1
                }
            }
            Face::Top => {
                if y == self.ny - 1 {
                    cell
                } else {
                    cell + self.nx
                }
            }
        }
    }

    /// Map physical coordinates to the containing cell, or `None` if the
    /// point lies outside the domain.
    pub fn cell_for_coordinates(&self, x: f64, y: f64) -> Option<usize> {
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        if x < 0.0 || x >= self.width || y < 0.0 || y >= self.height {
            return None;
        }
        let cx = ((x / self.dx) as usize).min(self.nx - 1);
        let cy = ((y / self.dy) as usize).min(self.ny - 1);
        Some(cy * self.nx + cx)
    }

    /// Physical center of a cell.
    pub fn cell_center(&self, cell: usize) -> (f64, f64) {
        let (x, y) = self.cell_position(cell);
        (
            (x as f64 + 0.5) * self.dx,
            (y as f64 + 0.5) * self.dy,
        )
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{Face, Grid};
    use crate::error::Error;

    #[test]
    fn interior_cells_have_four_distinct_neighbors() {
        let grid = Grid::new(4, 3, 4.0, 3.0).unwrap();
        let cell = 1 * 4 + 2;
        assert_eq!(grid.neighbor_cell(cell, Face::Left), cell - 1);
        assert_eq!(grid.neighbor_cell(cell, Face::Right), cell + 1);
        assert_eq!(grid.neighbor_cell(cell, Face::Bottom), cell - 4);
        assert_eq!(grid.neighbor_cell(cell, Face::Top), cell + 4);
    }

    #[test]
    fn boundary_cells_are_their_own_missing_neighbor() {
        let grid = Grid::new(4, 3, 4.0, 3.0).unwrap();
        assert_eq!(grid.neighbor_cell(0, Face::Left), 0);
        assert_eq!(grid.neighbor_cell(0, Face::Bottom), 0);
        assert_eq!(grid.neighbor_cell(3, Face::Right), 3);
        assert_eq!(grid.neighbor_cell(11, Face::Top), 11);
    }

    #[test]
    fn coordinates_resolve_to_the_containing_cell() {
        let grid = Grid::new(10, 10, 1.0, 1.0).unwrap();
        assert_eq!(grid.cell_for_coordinates(0.05, 0.05), Some(0));
        assert_eq!(grid.cell_for_coordinates(0.55, 0.35), Some(3 * 10 + 5));
        assert_eq!(grid.cell_for_coordinates(1.5, 0.5), None);
        assert_eq!(grid.cell_for_coordinates(-0.1, 0.5), None);
        assert_eq!(grid.cell_for_coordinates(f64::NAN, 0.5), None);
    }

    #[test]
    fn face_normals_are_outward_unit_vectors() {
        let grid = Grid::new(2, 2, 1.0, 1.0).unwrap();
        assert_eq!(grid.edge_count(0), 4);
        for face in Face::ALL {
            let (nx, ny) = grid.edge_normal(0, face);
            assert_eq!(nx * nx + ny * ny, 1.0);
        }
        assert_eq!(grid.edge_normal(0, Face::Left), (-1.0, 0.0));
        assert_eq!(grid.edge_normal(0, Face::Top), (0.0, 1.0));
    }

    #[test]
    fn edge_lengths_match_the_cell_spacing() {
        let grid = Grid::new(7, 3, 7.0, 3.0).unwrap();
        assert_eq!(grid.width(), 7.0);
        assert_eq!(grid.height(), 3.0);
        assert_eq!(grid.edge_length(0, Face::Left), grid.dy());
        assert_eq!(grid.edge_length(0, Face::Top), grid.dx());
        assert_eq!(grid.min_edge_length(), 1.0);
    }

    #[test]
    fn zero_sized_grids_are_rejected() {
        assert!(matches!(
            Grid::new(0, 4, 1.0, 1.0),
            Err(Error::Misconfiguration(_))
        ));
        assert!(matches!(
            Grid::new(4, 4, 0.0, 1.0),
            Err(Error::Misconfiguration(_))
        ));
        assert!(matches!(
            Grid::new(4, 4, 1.0, f64::INFINITY),
            Err(Error::Misconfiguration(_))
        ));
    }
}
