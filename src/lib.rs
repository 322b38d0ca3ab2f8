//! Client-side field-level encryption for document database containers.
//!
//! Items are encrypted path by path according to each container's client
//! encryption policy before they reach the wrapped [`CosmosClient`], and
//! decrypted on the way back. Container policies and unwrapped data
//! encryption keys are cached per client (or shared through
//! [`EncryptionCache`]).

pub mod batch;
pub mod cache;
pub mod client;
pub mod container;
pub mod error;
pub mod key_store;
pub mod key_wrap;
pub mod options;
pub mod policy;
mod processor;
pub mod query;
pub mod serializer;
mod settings;
pub mod store;

pub use batch::{
    BulkOperation, BulkOperationResult, TransactionalBatch, TransactionalBatchOperationResult,
    TransactionalBatchResponse,
};
pub use cache::EncryptionCache;
pub use client::{EncryptionClient, EncryptionClientBuilder, EncryptionDatabase};
pub use container::{
    ChangeFeedPager, EncryptionContainer, FeedResponse, ItemResponse, QueryPager,
};
pub use error::{EncryptionError, ErrorKind, KeyWrapError, Result, ValueConversionError};
pub use key_store::{ClientEncryptionKeyProperties, EncryptionKeyWrapMetadata, ResolvedKey};
pub use key_wrap::{AesKeyWrapProvider, KeyWrapProvider, AES_KEY_WRAP_RESOLVER_NAME};
pub use options::{
    BulkExecutionOptions, ChangeFeedOptions, EncryptionClientOptions, ItemRequestOptions,
    QueryOptions, DEFAULT_BULK_CONCURRENCY,
};
pub use policy::{
    ClientEncryptionIncludedPath, ClientEncryptionPolicy, MAX_SUPPORTED_POLICY_FORMAT_VERSION,
};
pub use processor::MAX_STRING_LENGTH;
pub use query::SqlQuerySpecWithEncryption;
pub use serializer::{DefaultItemSerializer, ItemSerializer};
pub use store::{
    ContainerProperties, CosmosClient, CosmosError, InMemoryCosmosClient, PartitionKey,
    PatchOperation, QuerySpec,
};

pub use cosmos_crypto::{EncryptionType, A256KW, AEAD_AES_256_CBC_HMAC_SHA256};
