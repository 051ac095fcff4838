// Service layer: transactional drivers around the pure engine.

pub mod identity;
