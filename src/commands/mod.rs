// Toolgate Command Modules — Control Boundary
//
// Each sub-module is a thin wrapper over an engine organism.
// Heavy logic lives in engine/; these modules only deserialise,
// delegate, and serialise.

pub mod mcp;
