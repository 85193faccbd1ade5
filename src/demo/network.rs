//! Grid road network graph for routing
//!
//! Junctions are graph nodes and one-way road segments are edges; a two-way
//! street is a pair of opposite edges. Vehicles on each road are indexed by
//! distance so a follower can find its leader.

use anyhow::{anyhow, Context, Result};
use ordered_float::OrderedFloat;
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use crate::engine::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JunctionId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoadId(pub usize);

/// A one-way road segment between two junctions
#[derive(Debug, Clone)]
pub struct Road {
    pub id: RoadId,
    pub from: JunctionId,
    pub to: JunctionId,
    pub length: f64,
    /// Degrees clockwise from north
    pub heading: f64,
}

impl Road {
    pub fn new(id: RoadId, from: JunctionId, to: JunctionId, start: &Position, end: &Position) -> Self {
        Self {
            id,
            from,
            to,
            length: start.distance(end),
            heading: start.heading_to(end),
        }
    }
}

/// Edge data for the road graph
#[derive(Debug, Clone, Copy)]
struct RoadEdge {
    road_id: RoadId,
    /// Length in centimetres, integer for the path search
    weight: u32,
}

impl RoadEdge {
    fn from_road(road: &Road) -> Self {
        let weight = (road.length * 100.0) as u32;
        Self {
            road_id: road.id,
            weight: weight.max(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct RoadNetwork {
    graph: DiGraph<JunctionId, RoadEdge>,
    junction_to_node: HashMap<JunctionId, NodeIndex>,
    node_to_junction: HashMap<NodeIndex, JunctionId>,
    positions: BTreeMap<JunctionId, Position>,
    roads: BTreeMap<RoadId, Road>,
    path_cache: HashMap<(JunctionId, JunctionId), Vec<JunctionId>>,
    /// Vehicles per road keyed by distance along it
    vehicles_on_roads: HashMap<RoadId, BTreeMap<OrderedFloat<f64>, u64>>,
    next_id: usize,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// `size` x `size` junctions `spacing` metres apart starting at `origin`,
    /// each linked to its orthogonal neighbours by two-way streets
    pub fn grid(size: usize, spacing: f64, origin: Position) -> Result<Self> {
        let mut network = Self::new();
        let mut ids = Vec::with_capacity(size * size);
        for row in 0..size {
            for col in 0..size {
                let position = Position::new(
                    origin.x + col as f64 * spacing,
                    origin.y + row as f64 * spacing,
                );
                ids.push(network.add_junction(position));
            }
        }

        for row in 0..size {
            for col in 0..size {
                let here = ids[row * size + col];
                if col + 1 < size {
                    network.add_two_way_road(here, ids[row * size + col + 1])?;
                }
                if row + 1 < size {
                    network.add_two_way_road(here, ids[(row + 1) * size + col])?;
                }
            }
        }
        Ok(network)
    }

    pub fn add_junction(&mut self, position: Position) -> JunctionId {
        let id = JunctionId(self.next_id);
        self.next_id += 1;
        let node = self.graph.add_node(id);
        self.junction_to_node.insert(id, node);
        self.node_to_junction.insert(node, id);
        self.positions.insert(id, position);
        self.path_cache.clear();
        id
    }

    pub fn add_road(&mut self, from: JunctionId, to: JunctionId) -> Result<RoadId> {
        let start = *self.junction_position(from).context("Start junction not found")?;
        let end = *self.junction_position(to).context("End junction not found")?;
        let from_node = self.junction_to_node[&from];
        let to_node = self.junction_to_node[&to];

        let id = RoadId(self.next_id);
        self.next_id += 1;
        let road = Road::new(id, from, to, &start, &end);
        self.graph.add_edge(from_node, to_node, RoadEdge::from_road(&road));
        self.roads.insert(id, road);
        self.path_cache.clear();
        Ok(id)
    }

    pub fn add_two_way_road(&mut self, a: JunctionId, b: JunctionId) -> Result<(RoadId, RoadId)> {
        let forward = self.add_road(a, b)?;
        let backward = self.add_road(b, a)?;
        Ok((forward, backward))
    }

    pub fn junction_position(&self, id: JunctionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn junctions(&self) -> impl Iterator<Item = (&JunctionId, &Position)> {
        self.positions.iter()
    }

    pub fn road(&self, id: RoadId) -> Option<&Road> {
        self.roads.get(&id)
    }

    pub fn road_count(&self) -> usize {
        self.roads.len()
    }

    pub fn junction_count(&self) -> usize {
        self.positions.len()
    }

    pub fn find_road_between(&self, from: JunctionId, to: JunctionId) -> Result<RoadId> {
        let from_node = self
            .junction_to_node
            .get(&from)
            .ok_or_else(|| anyhow!("Junction {:?} not found", from))?;
        let to_node = self
            .junction_to_node
            .get(&to)
            .ok_or_else(|| anyhow!("Junction {:?} not found", to))?;

        self.graph
            .edges(*from_node)
            .find(|edge| edge.target() == *to_node)
            .map(|edge| edge.weight().road_id)
            .ok_or_else(|| anyhow!("No road connecting {:?} to {:?}", from, to))
    }

    /// Shortest route as the junctions to visit after `start`
    pub fn find_path(&mut self, start: JunctionId, end: JunctionId) -> Option<Vec<JunctionId>> {
        if start == end {
            return Some(vec![]);
        }
        if let Some(path) = self.path_cache.get(&(start, end)) {
            return Some(path.clone());
        }

        let start_node = *self.junction_to_node.get(&start)?;
        let end_node = *self.junction_to_node.get(&end)?;
        let (_, nodes) = astar(
            &self.graph,
            start_node,
            |node| node == end_node,
            |edge| edge.weight().weight,
            |_| 0,
        )?;

        let path: Vec<JunctionId> = nodes
            .iter()
            .skip(1)
            .filter_map(|node| self.node_to_junction.get(node).copied())
            .collect();
        self.path_cache.insert((start, end), path.clone());
        Some(path)
    }

    pub fn find_closest_junction(&self, position: &Position) -> Option<JunctionId> {
        self.positions
            .iter()
            .min_by_key(|(_, p)| OrderedFloat(position.distance(p)))
            .map(|(id, _)| *id)
    }

    /// Move a vehicle's entry in the per-road index
    pub fn track_vehicle(
        &mut self,
        vehicle: u64,
        road: RoadId,
        distance: f64,
        previous: Option<(RoadId, f64)>,
    ) {
        if let Some((prev_road, prev_distance)) = previous {
            if let Some(index) = self.vehicles_on_roads.get_mut(&prev_road) {
                if index.get(&OrderedFloat(prev_distance)) == Some(&vehicle) {
                    index.remove(&OrderedFloat(prev_distance));
                }
            }
        }
        self.vehicles_on_roads
            .entry(road)
            .or_default()
            .insert(OrderedFloat(distance), vehicle);
    }

    pub fn untrack_vehicle(&mut self, vehicle: u64) {
        for index in self.vehicles_on_roads.values_mut() {
            index.retain(|_, id| *id != vehicle);
        }
    }

    /// Distance of the nearest vehicle strictly ahead on the same road
    pub fn vehicle_ahead(&self, road: RoadId, distance: f64) -> Option<(f64, u64)> {
        self.vehicles_on_roads
            .get(&road)?
            .range((Bound::Excluded(OrderedFloat(distance)), Bound::Unbounded))
            .next()
            .map(|(d, id)| (d.into_inner(), *id))
    }

    pub fn vehicles_on_road(&self, road: RoadId) -> usize {
        self.vehicles_on_roads.get(&road).map_or(0, BTreeMap::len)
    }
}
