pub mod decision_tree;
pub mod model;
pub mod throttle;
