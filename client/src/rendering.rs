use crate::game::ClientView;
use shared::VIEW_RADIUS;

pub const EMPTY: char = '.';
pub const OWN: char = '@';
pub const OTHER: char = '#';

/// Draws the neighborhood as a square character matrix centred on the
/// client's own position. Row 0 is the smallest `y`.
pub struct Renderer {
    radius: u32,
}

impl Renderer {
    pub fn new(radius: u32) -> Self {
        Self { radius }
    }

    /// Side length of the matrix.
    pub fn size(&self) -> usize {
        2 * self.radius as usize + 1
    }

    pub fn matrix(&self, view: &ClientView) -> Vec<Vec<char>> {
        let size = self.size();
        let radius = i64::from(self.radius);
        let (cx, cy) = view.position;
        let mut field = vec![vec![EMPTY; size]; size];

        for entity in view.neighbors.values() {
            if entity.distance_to(cx, cy) > u64::from(self.radius) {
                continue;
            }
            // within the radius, so neither offset can overflow
            let column = (entity.x - cx + radius) as usize;
            let row = (entity.y - cy + radius) as usize;
            field[row][column] = if Some(entity.id) == view.client_id {
                OWN
            } else {
                OTHER
            };
        }
        field
    }

    pub fn render(&self, view: &ClientView) -> String {
        let mut out = String::with_capacity(self.size() * (self.size() + 1));
        for row in self.matrix(view) {
            out.extend(row);
            out.push('\n');
        }
        out
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(VIEW_RADIUS)
    }
}
