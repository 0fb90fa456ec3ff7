//! Default values for configuration

/// Default embedding provider
pub fn default_embedding_provider() -> String {
    "openai".to_string()
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Default environment variable name for the provider API key
pub fn default_embedding_api_key_env() -> String {
    "RAGLINE_EMBEDDING_API_KEY".to_string()
}

/// Default batch size for embedding requests
pub fn default_embedding_batch_size() -> usize {
    100
}

/// Default delay between embedding batches in milliseconds
pub fn default_inter_batch_delay_ms() -> u64 {
    100
}

/// Default per-request timeout for provider calls in seconds
pub fn default_embedding_timeout_secs() -> u64 {
    30
}

/// Default embedding dimension (text-embedding-3-small)
pub fn default_embedding_dimension() -> usize {
    1536
}

/// Default maximum characters per chunk
pub fn default_chunk_max_chars() -> usize {
    1000
}

/// Default overlap characters between chunks
pub fn default_chunk_overlap() -> usize {
    200
}

/// Default number of pipeline workers
pub fn default_worker_concurrency() -> usize {
    4
}

/// Default task queue capacity
pub fn default_queue_capacity() -> usize {
    256
}

/// Default maximum retries for a failed processing attempt
pub fn default_max_retries() -> u32 {
    3
}

/// Default initial retry backoff in milliseconds
pub fn default_initial_backoff_ms() -> u64 {
    1_000
}

/// Default maximum retry backoff in milliseconds
pub fn default_max_backoff_ms() -> u64 {
    60_000
}

/// Default overall per-task timeout in seconds
pub fn default_task_timeout_secs() -> u64 {
    600
}

/// Default interval between maintenance sweeps in seconds
pub fn default_maintenance_interval_secs() -> u64 {
    300
}

/// Default number of search results
pub fn default_search_limit() -> usize {
    10
}

/// Default minimum similarity for search results
pub fn default_similarity_threshold() -> f32 {
    0.7
}
