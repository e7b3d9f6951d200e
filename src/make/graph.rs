// Build dependency graph
//
//  Copyright (C) 2014-2022 Ryan Specialty Group, LLC.
//
//  This file is part of t3make.
//
//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.
//
//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.
//
//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Build dependency graph.
//!
//! Each file taking part in a build is a node;
//!   an edge runs from every input to the file derived from it:
//!
//! ```text
//! a.t ──> a.t3s ──┬──> a.t3o ──┐
//!                 │            ├──> game.t3 <── resources
//! b.t ──> b.t3s ──┴──> b.t3o ──┘
//! ```
//!
//! An object file depends on every symbol file of the build,
//!   since any of them may declare names used by its source.
//!
//! A derived file must be rebuilt ("is dirty") when
//!   (a) the caller says it is stale
//!     (e.g. a forced build or a fingerprint mismatch),
//!   (b) it does not exist,
//!   (c) one of its inputs is missing or newer than it,
//!   or (d) one of its inputs is itself being rebuilt.
//! Sources and resources are never dirty.

use fixedbitset::FixedBitSet;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use petgraph::Direction;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// The role of a file in a build.
///
/// Module and resource indexes are positions in the caller's lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Source(usize),
    Symbol(usize),
    Object(usize),
    Resource(usize),
    Image,
}

impl Target {
    fn is_leaf(self) -> bool {
        matches!(self, Target::Source(_) | Target::Resource(_))
    }
}

#[derive(Debug)]
struct Node {
    target: Target,
    path: PathBuf,
}

/// Paths of the files of one module.
#[derive(Debug, Clone, Copy)]
pub struct ModuleFiles<'a> {
    pub source: &'a Path,
    pub symbol: &'a Path,
    pub object: &'a Path,
}

#[derive(Debug, Default)]
pub struct DepGraph {
    graph: DiGraph<Node, ()>,
    symbols: Vec<NodeIndex>,
    objects: Vec<NodeIndex>,
    image: Option<NodeIndex>,
}

impl DepGraph {
    /// Graph of the given modules,
    ///   optionally linked with `resources` into `image`.
    pub fn new(
        modules: &[ModuleFiles],
        image: Option<(&Path, &[PathBuf])>,
    ) -> Self {
        let mut sut = Self::default();

        let sources: Vec<_> = modules
            .iter()
            .enumerate()
            .map(|(i, m)| sut.add(Target::Source(i), m.source))
            .collect();

        for (i, m) in modules.iter().enumerate() {
            let sym = sut.add(Target::Symbol(i), m.symbol);
            sut.graph.add_edge(sources[i], sym, ());
            sut.symbols.push(sym);
        }

        for (i, m) in modules.iter().enumerate() {
            let obj = sut.add(Target::Object(i), m.object);
            sut.graph.add_edge(sources[i], obj, ());

            for sym in &sut.symbols {
                sut.graph.add_edge(*sym, obj, ());
            }

            sut.objects.push(obj);
        }

        if let Some((path, resources)) = image {
            let img = sut.add(Target::Image, path);

            for obj in &sut.objects {
                sut.graph.add_edge(*obj, img, ());
            }

            for (i, res) in resources.iter().enumerate() {
                let node = sut.add(Target::Resource(i), res);
                sut.graph.add_edge(node, img, ());
            }

            sut.image = Some(img);
        }

        sut
    }

    fn add(&mut self, target: Target, path: &Path) -> NodeIndex {
        self.graph.add_node(Node {
            target,
            path: path.to_path_buf(),
        })
    }

    /// Determine which derived files must be rebuilt.
    ///
    /// `stale` is consulted for every derived file and may force a
    ///   rebuild regardless of timestamps.
    pub fn plan<F: FnMut(Target) -> bool>(&self, mut stale: F) -> Plan {
        let count = self.graph.node_count();
        let mut dirty = FixedBitSet::with_capacity(count);

        let mtimes: Vec<Option<SystemTime>> = self
            .graph
            .node_indices()
            .map(|n| crate::fs::mtime(&self.graph[n].path))
            .collect();

        let mut topo = Topo::new(&self.graph);

        while let Some(n) = topo.next(&self.graph) {
            let node = &self.graph[n];

            if node.target.is_leaf() {
                continue;
            }

            let out = mtimes[n.index()];

            let rebuild = stale(node.target)
                || out.is_none()
                || self
                    .graph
                    .neighbors_directed(n, Direction::Incoming)
                    .any(|input| {
                        dirty.contains(input.index())
                            || match (mtimes[input.index()], out) {
                                (Some(tin), Some(tout)) => tin > tout,
                                _ => true,
                            }
                    });

            dirty.set(n.index(), rebuild);
        }

        Plan {
            dirty,
            symbols: self.symbols.clone(),
            objects: self.objects.clone(),
            image: self.image,
        }
    }
}

/// Outcome of planning a build.
#[derive(Debug)]
pub struct Plan {
    dirty: FixedBitSet,
    symbols: Vec<NodeIndex>,
    objects: Vec<NodeIndex>,
    image: Option<NodeIndex>,
}

impl Plan {
    pub fn is_dirty(&self, target: Target) -> bool {
        let node = match target {
            Target::Symbol(i) => self.symbols.get(i),
            Target::Object(i) => self.objects.get(i),
            Target::Image => self.image.as_ref(),
            Target::Source(_) | Target::Resource(_) => None,
        };

        node.map(|n| self.dirty.contains(n.index())).unwrap_or(false)
    }

    /// Number of derived files to rebuild.
    pub fn dirty_count(&self) -> usize {
        self.dirty.count_ones(..)
    }
}
