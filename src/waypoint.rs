use crate::math::Point3d;
use crate::{RouteId, WaypointId};
use log::warn;
use pathfinding::prelude::brent;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

/// Turn annotations attached to a waypoint, used to drive the turn indicators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TurnMarkers {
    /// Switch the left indicator on when this waypoint is reached.
    pub left_turn_start: bool,
    /// Switch the right indicator on when this waypoint is reached.
    pub right_turn_start: bool,
    /// Switch both indicators off when this waypoint is reached.
    pub turn_end: bool,
}

impl TurnMarkers {
    pub const NONE: Self = Self {
        left_turn_start: false,
        right_turn_start: false,
        turn_end: false,
    };

    pub const LEFT: Self = Self {
        left_turn_start: true,
        ..Self::NONE
    };

    pub const RIGHT: Self = Self {
        right_turn_start: true,
        ..Self::NONE
    };

    pub const END: Self = Self {
        turn_end: true,
        ..Self::NONE
    };
}

/// A single node of a route.
#[derive(Clone, Debug)]
pub struct Waypoint {
    /// The world space position.
    pub position: Point3d,
    /// The turn annotations.
    pub markers: TurnMarkers,
    /// The next waypoint in the chain.
    next: Option<WaypointId>,
    /// The previous waypoint in the chain.
    prev: Option<WaypointId>,
}

impl Waypoint {
    /// The next waypoint in the chain, if any.
    pub fn next(&self) -> Option<WaypointId> {
        self.next
    }

    /// The previous waypoint in the chain, if any.
    pub fn prev(&self) -> Option<WaypointId> {
        self.prev
    }
}

/// A route owns its waypoints. Walking starts from its first child.
#[derive(Clone, Debug, Default)]
struct Route {
    children: Vec<WaypointId>,
}

/// The authored waypoint chains of a scene.
#[derive(Clone, Debug, Default)]
pub struct WaypointNetwork {
    waypoints: SlotMap<WaypointId, Waypoint>,
    routes: SlotMap<RouteId, Route>,
}

/// A single node of a materialised [Path].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathNode {
    /// The waypoint this node was copied from.
    pub id: WaypointId,
    /// The world space position.
    pub position: Point3d,
    /// The turn annotations.
    pub markers: TurnMarkers,
}

/// The ordered waypoints a vehicle follows during one run.
///
/// A path is a snapshot of its route's chain at the time it was built,
/// so edits to the chain only affect vehicles spawned afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Path {
    nodes: Vec<PathNode>,
}

impl WaypointNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds an empty route.
    pub fn add_route(&mut self) -> RouteId {
        self.routes.insert(Route::default())
    }

    /// Adds a route through the given points, linked in order.
    pub fn add_route_through(&mut self, points: &[(Point3d, TurnMarkers)]) -> RouteId {
        let route = self.add_route();
        for (position, markers) in points {
            self.append_waypoint(route, *position, *markers);
        }
        route
    }

    /// Appends a waypoint to the end of a route and links it after the
    /// previously appended one.
    ///
    /// Returns `None` if the route does not exist.
    pub fn append_waypoint(
        &mut self,
        route: RouteId,
        position: Point3d,
        markers: TurnMarkers,
    ) -> Option<WaypointId> {
        let prev = self.routes.get(route)?.children.last().copied();
        let id = self.waypoints.insert(Waypoint {
            position,
            markers,
            next: None,
            prev,
        });
        if let Some(prev) = prev.and_then(|prev| self.waypoints.get_mut(prev)) {
            prev.next = Some(id);
        }
        self.routes[route].children.push(id);
        Some(id)
    }

    /// Points the `next` link of `from` at `to`, or clears it.
    pub fn set_next(&mut self, from: WaypointId, to: Option<WaypointId>) {
        if let Some(old) = self.waypoints.get(from).and_then(|w| w.next) {
            if let Some(old) = self.waypoints.get_mut(old) {
                old.prev = None;
            }
        }
        if let Some(waypoint) = self.waypoints.get_mut(from) {
            waypoint.next = to;
        }
        if let Some(to) = to.and_then(|to| self.waypoints.get_mut(to)) {
            to.prev = Some(from);
        }
    }

    /// Moves a waypoint.
    pub fn set_position(&mut self, id: WaypointId, position: Point3d) {
        if let Some(waypoint) = self.waypoints.get_mut(id) {
            waypoint.position = position;
        }
    }

    /// Gets a waypoint.
    pub fn waypoint(&self, id: WaypointId) -> Option<&Waypoint> {
        self.waypoints.get(id)
    }

    /// The waypoints owned by a route, in authoring order.
    pub fn route_children(&self, route: RouteId) -> &[WaypointId] {
        self.routes
            .get(route)
            .map(|r| r.children.as_slice())
            .unwrap_or(&[])
    }

    /// Materialises the path of a route by walking the `next` links from its
    /// first child until a waypoint has no successor.
    ///
    /// Returns an empty path if the route has no children. A chain that loops
    /// back on itself is cut just before the first repeated waypoint.
    pub fn build_path(&self, route: RouteId) -> Path {
        let Some(first) = self.route_children(route).first().copied() else {
            return Path::default();
        };

        let successor = |id: Option<WaypointId>| id.and_then(|id| self.waypoints.get(id)?.next);
        let (cycle_len, repeated, cycle_start) = brent(Some(first), successor);
        let count = match repeated {
            None => cycle_start,
            Some(id) => {
                warn!("Route {route:?} loops back to waypoint {id:?}; truncating its path");
                cycle_start + cycle_len
            }
        };

        let nodes = std::iter::successors(Some(first), |id| self.waypoints.get(*id)?.next)
            .take(count)
            .map_while(|id| {
                self.waypoints.get(id).map(|w| PathNode {
                    id,
                    position: w.position,
                    markers: w.markers,
                })
            })
            .collect();

        Path { nodes }
    }
}

impl Path {
    /// Creates a path from nodes.
    pub fn from_nodes(nodes: Vec<PathNode>) -> Self {
        Self { nodes }
    }

    /// The number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the path has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node at `index`, or `None` once the path is complete.
    pub fn node(&self, index: usize) -> Option<&PathNode> {
        self.nodes.get(index)
    }

    /// Whether a vehicle whose next node is `index` has finished the path.
    pub fn is_complete(&self, index: usize) -> bool {
        index >= self.nodes.len()
    }

    /// Iterates over the nodes in order.
    pub fn iter(&self) -> impl Iterator<Item = &PathNode> {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn point(z: f64) -> Point3d {
        Point3d::new(0.0, 0.0, z)
    }

    #[test]
    fn builds_in_link_order() {
        let mut network = WaypointNetwork::new();
        let route = network.add_route_through(&[
            (point(0.0), TurnMarkers::NONE),
            (point(10.0), TurnMarkers::LEFT),
            (point(20.0), TurnMarkers::END),
        ]);

        let path = network.build_path(route);
        assert_eq!(path.len(), 3);
        let zs: Vec<f64> = path.iter().map(|n| n.position.z).collect();
        assert_eq!(zs, vec![0.0, 10.0, 20.0]);
        assert_eq!(path.node(1).unwrap().markers, TurnMarkers::LEFT);
        assert!(path.node(3).is_none());
        assert!(path.is_complete(3));
    }

    #[test]
    fn empty_route_gives_empty_path() {
        let mut network = WaypointNetwork::new();
        let route = network.add_route();
        assert!(network.build_path(route).is_empty());
    }

    #[test]
    fn relinking_changes_future_paths_only() {
        let mut network = WaypointNetwork::new();
        let route = network.add_route_through(&[
            (point(0.0), TurnMarkers::NONE),
            (point(10.0), TurnMarkers::NONE),
            (point(20.0), TurnMarkers::NONE),
        ]);
        let before = network.build_path(route);

        let children = network.route_children(route).to_vec();
        network.set_next(children[0], Some(children[2]));
        let after = network.build_path(route);

        assert_eq!(before.len(), 3);
        assert_eq!(after.len(), 2);
        assert_eq!(after.node(1).unwrap().id, children[2]);
    }

    #[test]
    fn cyclic_chain_is_truncated() {
        let mut network = WaypointNetwork::new();
        let route = network.add_route_through(&[
            (point(0.0), TurnMarkers::NONE),
            (point(10.0), TurnMarkers::NONE),
            (point(20.0), TurnMarkers::NONE),
        ]);
        let children = network.route_children(route).to_vec();
        network.set_next(children[2], Some(children[1]));

        let path = network.build_path(route);
        let ids: Vec<WaypointId> = path.iter().map(|n| n.id).collect();
        assert_eq!(ids, children);
    }
}
