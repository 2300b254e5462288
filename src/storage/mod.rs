pub mod backend;
pub mod encoded_key;
pub mod index;
pub mod keyspace;
