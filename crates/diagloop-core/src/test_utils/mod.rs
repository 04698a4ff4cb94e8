pub mod mock_mcp_server;
pub mod scripted_transport;
