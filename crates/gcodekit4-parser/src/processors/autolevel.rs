//! Adjusts commanded Z to follow a probed, non-flat surface.

use super::move_splitter::MoveSplitter;
use super::surface_map::SurfaceMap;
use crate::processor::Processor;
use gcodekit4_core::{GcodeLine, Result};
use std::path::Path;

/// Adds a height correction, read from a [`SurfaceMap`], to every
/// absolute XY motion line's Z value. Depends on a [`MoveSplitter`]
/// ahead of it in the chain so long moves are densely leveled rather
/// than interpolated linearly between endpoints.
pub struct Autolevel {
    map: SurfaceMap,
    incremental: bool,
    dry_run: bool,
}

impl Autolevel {
    /// An autoleveler driven by an already-loaded surface map.
    pub fn new(map: SurfaceMap) -> Self {
        Self { map, incremental: false, dry_run: false }
    }

    /// Load a surface map from disk and build an autoleveler from it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(SurfaceMap::load(path.as_ref())?))
    }
}

impl Processor for Autolevel {
    fn name(&self) -> &str {
        "autolevel"
    }

    fn add_to_chain(self: Box<Self>, chain: &mut Vec<Box<dyn Processor>>) {
        chain.push(Box::new(MoveSplitter::new(self.map.min_spacing)));
        chain.push(self);
    }

    fn copy(&self) -> Box<dyn Processor> {
        Box::new(Self::new(self.map.clone()))
    }

    fn process(&mut self, mut line: GcodeLine, push: &mut dyn FnMut(GcodeLine)) -> Result<()> {
        if let Some(g) = line.get('G') {
            if g == 90.0 {
                self.incremental = false;
            } else if g == 91.0 {
                self.incremental = true;
            }
            let is_coord_change = (54.0..=59.0).contains(&g);
            let is_g53 = g == 53.0;
            let is_motion = matches!(g, 0.0 | 1.0 | 2.0 | 3.0);

            if is_motion && !self.incremental && !is_coord_change && !is_g53 {
                if let (Some(x), Some(y)) = (line.get('X'), line.get('Y')) {
                    if let Some(dz) = self.map.predict_z(x, y) {
                        let z = line.get('Z').unwrap_or(0.0) + dz;
                        line.set('Z', z);
                    }
                }
            }
        }
        push(line);
        Ok(())
    }

    fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::surface_map::SurfacePoint;

    #[test]
    fn adds_predicted_z_to_motion_line() {
        let map = SurfaceMap::from_points(
            vec![
                SurfacePoint { x: 0.0, y: 0.0, z: 0.0 },
                SurfacePoint { x: 10.0, y: 0.0, z: 1.0 },
                SurfacePoint { x: 0.0, y: 10.0, z: -1.0 },
            ],
            5.0,
        );
        let mut level = Autolevel::new(map);
        let mut out = None;
        let mut push = |l: GcodeLine| out = Some(l);
        level
            .process(GcodeLine::parse(1, "G1 X5 Y5 Z0 F100").unwrap(), &mut push)
            .unwrap();
        let line = out.unwrap();
        assert!((line.get('Z').unwrap() - 0.0).abs() < 1e-6);
    }

    #[test]
    fn add_to_chain_prepends_a_move_splitter_sized_to_min_spacing() {
        let map = SurfaceMap::from_points(vec![], 3.5);
        let level: Box<dyn Processor> = Box::new(Autolevel::new(map));
        let mut chain = Vec::new();
        level.add_to_chain(&mut chain);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name(), "move_splitter");
        assert_eq!(chain[1].name(), "autolevel");
    }
}
